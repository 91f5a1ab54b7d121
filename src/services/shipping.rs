//! Delivery fee computation.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::collaborators::Store;
use crate::config::{ShippingConfig, ZoneRates};
use crate::entities::DeliveryMethod;
use crate::errors::ServiceError;

/// Home delivery fees keyed by lowercase zone name.
#[derive(Debug, Clone)]
pub struct ShippingRateTable {
    zones: HashMap<String, ZoneRates>,
}

impl From<&ShippingConfig> for ShippingRateTable {
    fn from(config: &ShippingConfig) -> Self {
        let zones = config
            .zones
            .iter()
            .map(|(zone, rates)| (zone.trim().to_lowercase(), rates.clone()))
            .collect();
        Self { zones }
    }
}

impl ShippingRateTable {
    pub fn rate(&self, zone: &str, method: DeliveryMethod) -> Option<Decimal> {
        let rates = self.zones.get(&zone.trim().to_lowercase())?;
        match method {
            DeliveryMethod::StandardDelivery => Some(rates.standard),
            DeliveryMethod::PriorityDelivery => Some(rates.priority),
            DeliveryMethod::PickupDelivery => Some(Decimal::ZERO),
        }
    }
}

/// Pure fee calculator: same inputs and reference data, same answer.
#[derive(Debug, Clone)]
pub struct ShippingFeeCalculator {
    rates: ShippingRateTable,
}

impl ShippingFeeCalculator {
    pub fn new(rates: ShippingRateTable) -> Self {
        Self { rates }
    }

    /// `zone` is the delivery zone of `address_id`, if it has one.
    pub fn compute_fee(
        &self,
        zone: Option<&str>,
        address_id: i32,
        method: DeliveryMethod,
        pickup_store_id: Option<i32>,
        known_stores: &[Store],
    ) -> Result<Decimal, ServiceError> {
        if method.is_pickup() {
            let store_id = pickup_store_id.ok_or(ServiceError::StoreRequired)?;
            if !known_stores.iter().any(|s| s.store_id == store_id) {
                return Err(ServiceError::UnknownStore(store_id));
            }
            return Ok(Decimal::ZERO);
        }

        zone.and_then(|zone| self.rates.rate(zone, method))
            .ok_or(ServiceError::UnroutableAddress(address_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use rust_decimal_macros::dec;

    #[fixture]
    fn calculator() -> ShippingFeeCalculator {
        ShippingFeeCalculator::new(ShippingRateTable::from(&ShippingConfig::default()))
    }

    fn stores() -> Vec<Store> {
        vec![Store {
            store_id: 3,
            store_name: "Makati Branch".into(),
        }]
    }

    #[rstest]
    #[case("metro", DeliveryMethod::StandardDelivery, dec!(150))]
    #[case("metro", DeliveryMethod::PriorityDelivery, dec!(250))]
    #[case("Luzon", DeliveryMethod::StandardDelivery, dec!(200))]
    #[case("visayas", DeliveryMethod::PriorityDelivery, dec!(400))]
    #[case(" mindanao ", DeliveryMethod::StandardDelivery, dec!(300))]
    fn home_delivery_uses_zone_rates(
        calculator: ShippingFeeCalculator,
        #[case] zone: &str,
        #[case] method: DeliveryMethod,
        #[case] expected: Decimal,
    ) {
        let fee = calculator
            .compute_fee(Some(zone), 1, method, None, &[])
            .unwrap();
        assert_eq!(fee, expected);
    }

    #[rstest]
    fn pickup_is_free_at_known_store(calculator: ShippingFeeCalculator) {
        let fee = calculator
            .compute_fee(None, 1, DeliveryMethod::PickupDelivery, Some(3), &stores())
            .unwrap();
        assert_eq!(fee, Decimal::ZERO);
    }

    #[rstest]
    fn pickup_requires_known_store(calculator: ShippingFeeCalculator) {
        let missing =
            calculator.compute_fee(None, 1, DeliveryMethod::PickupDelivery, None, &stores());
        assert!(matches!(missing, Err(ServiceError::StoreRequired)));

        let unknown =
            calculator.compute_fee(None, 1, DeliveryMethod::PickupDelivery, Some(99), &stores());
        assert!(matches!(unknown, Err(ServiceError::UnknownStore(99))));
    }

    #[rstest]
    #[case(None)]
    #[case(Some("atlantis"))]
    fn unknown_zone_is_unroutable(calculator: ShippingFeeCalculator, #[case] zone: Option<&str>) {
        let err = calculator
            .compute_fee(zone, 42, DeliveryMethod::StandardDelivery, None, &[])
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnroutableAddress(42)));
    }

    #[rstest]
    fn store_id_is_ignored_for_home_delivery(calculator: ShippingFeeCalculator) {
        let fee = calculator
            .compute_fee(Some("metro"), 1, DeliveryMethod::StandardDelivery, Some(99), &[])
            .unwrap();
        assert_eq!(fee, dec!(150));
    }
}
