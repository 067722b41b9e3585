use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::UUID_SERIAL_RX_TX;
use crate::core::bluetooth::types::{CharacteristicHandle, ServiceInfo};

/// Serial profile of the peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Restricts discovery to one service. `None` walks every service.
    pub service_uuid: Option<Uuid>,

    /// The bidirectional serial characteristic, used for both TX and RX.
    pub characteristic_uuid: Uuid,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            service_uuid: None,
            characteristic_uuid: UUID_SERIAL_RX_TX,
        }
    }
}

impl ProfileConfig {
    /// Walks the resolved services in order and returns the first
    /// characteristic matching the profile.
    pub fn resolve(&self, services: &[ServiceInfo]) -> Option<CharacteristicHandle> {
        services
            .iter()
            .filter(|service| self.service_uuid.is_none_or(|uuid| uuid == service.uuid))
            .find_map(|service| {
                service
                    .characteristics
                    .iter()
                    .find(|c| c.uuid == self.characteristic_uuid)
                    .map(|c| CharacteristicHandle {
                        service_uuid: service.uuid,
                        characteristic_uuid: c.uuid,
                        properties: c.properties,
                    })
            })
    }
}
