//! Application layer for the repair-shop workflow.
//!
//! [`service::JobSheetService`] is the single entry point callers use: it
//! owns the command dispatcher, consults the outbound directories in
//! [`ports`], and answers queries by rehydrating from the event store.

pub mod ports;
pub mod service;

pub use ports::{
    CustomerDirectory, InMemoryCustomers, InMemoryInventory, InMemoryVehicles, InventoryLookup,
    ProductInfo, VehicleDirectory, VehicleLabel,
};
pub use service::{JobSheetService, ServiceError, ServiceResult};
