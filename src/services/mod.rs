//! Business logic services

pub mod catalog;
pub mod circulation;
pub mod fines;
pub mod members;

use std::sync::Arc;

use crate::{config::CirculationConfig, repository::CirculationStore};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn CirculationStore>,
    pub catalog: catalog::CatalogService,
    pub members: members::MembersService,
    pub circulation: circulation::CirculationService,
}

impl Services {
    /// Create all services on top of one store
    pub fn new(store: Arc<dyn CirculationStore>, rules: CirculationConfig) -> Self {
        Self {
            catalog: catalog::CatalogService::new(store.clone()),
            members: members::MembersService::new(store.clone(), rules.membership_years),
            circulation: circulation::CirculationService::new(store.clone(), rules),
            store,
        }
    }
}
