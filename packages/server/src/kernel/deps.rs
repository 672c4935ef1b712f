//! Server dependencies shared by handlers, transports and jobs.
//!
//! One container, built once in `main` (or by the test harness) and passed
//! around by clone. Nothing here is a process-wide singleton.

use std::sync::Arc;

use crate::domains::auth::JwtService;
use crate::domains::resources::{BaseResourceStore, Catalog, ResourceService};
use crate::kernel::rooms::{RoomAccess, RoomHub};

#[derive(Clone)]
pub struct ServerDeps {
    pub store: Arc<dyn BaseResourceStore>,
    pub catalog: Arc<Catalog>,
    /// Room membership table for WebSocket/SSE clients
    pub rooms: RoomHub,
    pub jwt_service: Arc<JwtService>,
    pub room_access: RoomAccess,
}

impl ServerDeps {
    pub fn new(
        store: Arc<dyn BaseResourceStore>,
        catalog: Arc<Catalog>,
        rooms: RoomHub,
        jwt_service: Arc<JwtService>,
        room_access: RoomAccess,
    ) -> Self {
        Self {
            store,
            catalog,
            rooms,
            jwt_service,
            room_access,
        }
    }

    /// Resource service over these dependencies.
    pub fn resources(&self) -> ResourceService {
        ResourceService::new(self.store.clone(), self.catalog.clone(), self.rooms.clone())
    }
}
