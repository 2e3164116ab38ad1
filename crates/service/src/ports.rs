//! Outbound ports: the directories the job sheet workflow consults.
//!
//! Inventory, customers and vehicles are owned by other systems; the service
//! only ever asks them point questions (price of a part, display name of a
//! customer). Trait objects keep the wiring swappable; the in-memory
//! implementations back tests and the desktop build.

use std::collections::HashMap;
use std::sync::RwLock;

use gearshop_jobsheet::{CustomerId, ProductRef, VehicleId};

/// Inventory answer for one product reference at the moment of asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub name: String,
    /// Sale price in smallest currency unit.
    pub unit_sale_price: u64,
}

pub trait InventoryLookup: Send + Sync {
    /// `None` means the reference is unknown to inventory.
    fn sale_info(&self, product_ref: &ProductRef) -> Option<ProductInfo>;
}

pub trait CustomerDirectory: Send + Sync {
    fn display_name(&self, customer_id: CustomerId) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleLabel {
    pub model: Option<String>,
    pub license_plate: Option<String>,
}

pub trait VehicleDirectory: Send + Sync {
    fn label(&self, vehicle_id: VehicleId) -> Option<VehicleLabel>;
}

#[derive(Debug, Default)]
pub struct InMemoryInventory {
    products: RwLock<HashMap<ProductRef, ProductInfo>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product_ref: ProductRef, info: ProductInfo) {
        let mut guard = self.products.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(product_ref, info);
    }
}

impl InventoryLookup for InMemoryInventory {
    fn sale_info(&self, product_ref: &ProductRef) -> Option<ProductInfo> {
        let guard = self.products.read().unwrap_or_else(|e| e.into_inner());
        guard.get(product_ref).cloned()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCustomers {
    names: RwLock<HashMap<CustomerId, String>>,
}

impl InMemoryCustomers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, customer_id: CustomerId, name: impl Into<String>) {
        let mut guard = self.names.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(customer_id, name.into());
    }
}

impl CustomerDirectory for InMemoryCustomers {
    fn display_name(&self, customer_id: CustomerId) -> Option<String> {
        let guard = self.names.read().unwrap_or_else(|e| e.into_inner());
        guard.get(&customer_id).cloned()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryVehicles {
    labels: RwLock<HashMap<VehicleId, VehicleLabel>>,
}

impl InMemoryVehicles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, vehicle_id: VehicleId, label: VehicleLabel) {
        let mut guard = self.labels.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(vehicle_id, label);
    }
}

impl VehicleDirectory for InMemoryVehicles {
    fn label(&self, vehicle_id: VehicleId) -> Option<VehicleLabel> {
        let guard = self.labels.read().unwrap_or_else(|e| e.into_inner());
        guard.get(&vehicle_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gearshop_core::AggregateId;

    #[test]
    fn inventory_lookup_misses_are_none() {
        let inventory = InMemoryInventory::new();
        inventory.insert(
            ProductRef::new("BRK-PAD-F"),
            ProductInfo {
                name: "Front brake pads".to_string(),
                unit_sale_price: 11_000,
            },
        );

        assert!(inventory.sale_info(&ProductRef::new("BRK-PAD-F")).is_some());
        assert!(inventory.sale_info(&ProductRef::new("NOPE")).is_none());
    }

    #[test]
    fn vehicle_labels_round_trip() {
        let vehicles = InMemoryVehicles::new();
        let vehicle_id = VehicleId(AggregateId::new());
        vehicles.insert(
            vehicle_id,
            VehicleLabel {
                model: Some("Corolla 2019".to_string()),
                license_plate: Some("AB-123-CD".to_string()),
            },
        );

        let label = vehicles.label(vehicle_id).unwrap();
        assert_eq!(label.model.as_deref(), Some("Corolla 2019"));
    }
}
