// HTTP routes
pub mod health;
pub mod resources;
pub mod room_access;
pub mod socket;
pub mod stream;

pub use health::*;
pub use resources::*;
pub use socket::socket_handler;
pub use stream::room_events_handler;
