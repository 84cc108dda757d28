//! The zkdata marketplace: dataset registry, zero-knowledge verifier and payment manager.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::plan::{ArgumentProducer, CallSpec, ContractSpec, DeploymentPlan};

pub const DATASET_REGISTRY: &str = "dataset_registry";
pub const ZK_VERIFIER: &str = "zk_verifier";
pub const PAYMENT_MANAGER: &str = "payment_manager";

/// One token in the chain's smallest unit (12 decimals).
pub const UNIT: u64 = 1_000_000_000_000;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Economic parameters passed to the marketplace constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceParams {
    /// Fee charged by the registry for every dataset registration.
    pub registration_fee: u64,
    /// Platform fee taken by the payment manager, in basis points.
    pub platform_fee_bps: u16,
    pub escrow_period_ms: u64,
    /// Minimum stake required to challenge a proof.
    pub challenge_stake: u64,
    pub challenge_period_ms: u64,
}

impl Default for MarketplaceParams {
    fn default() -> Self {
        Self {
            registration_fee: UNIT,
            platform_fee_bps: 250,
            escrow_period_ms: DAY_MS,
            challenge_stake: UNIT,
            challenge_period_ms: DAY_MS,
        }
    }
}

impl MarketplaceParams {
    /// The standard deployment: registry, then verifier, then payment manager; the payment
    /// manager is then allowed to validate proofs, and one dataset, payment, verification key
    /// and proof are pushed through the contracts.
    pub fn plan(&self) -> DeploymentPlan {
        let registry = ContractSpec::new(DATASET_REGISTRY)
            .with_arg(ArgumentProducer::literal(self.registration_fee));

        // The verifier is deployed before the payment manager exists, so the registry address
        // stands in for it.
        let verifier = ContractSpec::new(ZK_VERIFIER)
            .with_arg(ArgumentProducer::address_of(DATASET_REGISTRY))
            .with_arg(ArgumentProducer::address_of(DATASET_REGISTRY))
            .with_arg(ArgumentProducer::literal(self.challenge_stake))
            .with_arg(ArgumentProducer::literal(self.challenge_period_ms));

        let payments = ContractSpec::new(PAYMENT_MANAGER)
            .with_arg(ArgumentProducer::address_of(DATASET_REGISTRY))
            .with_arg(ArgumentProducer::address_of(ZK_VERIFIER))
            .with_arg(ArgumentProducer::literal(self.platform_fee_bps))
            .with_arg(ArgumentProducer::literal(self.escrow_period_ms));

        let wiring = vec![
            CallSpec::new("authorize payment manager", ZK_VERIFIER, "add_validator")
                .with_arg(ArgumentProducer::address_of(PAYMENT_MANAGER)),
        ];

        let smoke_tests = vec![
            CallSpec::new("register dataset", DATASET_REGISTRY, "register_dataset")
                .with_value(self.registration_fee)
                .with_arg(ArgumentProducer::literal("Test Dataset"))
                .with_arg(ArgumentProducer::literal(
                    "A test dataset for deployment verification",
                ))
                .with_arg(ArgumentProducer::literal(json!(vec![0u8; 32])))
                .with_arg(ArgumentProducer::literal(json!(vec![1u8; 32])))
                .with_arg(ArgumentProducer::literal(UNIT)),
            CallSpec::new("create payment", PAYMENT_MANAGER, "create_payment")
                .with_value(UNIT)
                .with_arg(ArgumentProducer::literal(1)),
            CallSpec::new(
                "register verification key",
                ZK_VERIFIER,
                "register_verification_key",
            )
            .with_arg(ArgumentProducer::literal(json!([1, 2, 3, 4])))
            .with_arg(ArgumentProducer::literal("halo2")),
            CallSpec::new("submit proof", ZK_VERIFIER, "submit_proof")
                .with_arg(ArgumentProducer::literal(1))
                .with_arg(ArgumentProducer::literal(1))
                .with_arg(ArgumentProducer::literal(json!([5, 6, 7, 8])))
                .with_arg(ArgumentProducer::literal(json!([9, 10])))
                .with_arg(ArgumentProducer::result_of("register verification key"))
                .with_arg(ArgumentProducer::literal(json!(vec![0u8; 32]))),
        ];

        DeploymentPlan {
            contracts: vec![registry, verifier, payments],
            wiring,
            smoke_tests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_respects_dependency_order() {
        let plan = MarketplaceParams::default().plan();

        for (index, spec) in plan.contracts.iter().enumerate() {
            let earlier: Vec<&str> = plan.contracts[..index]
                .iter()
                .map(|s| s.name.as_str())
                .collect();
            for arg in &spec.args {
                if let Some(dependency) = arg.dependency() {
                    assert!(
                        earlier.contains(&dependency),
                        "{} depends on {} which is not deployed before it",
                        spec.name,
                        dependency
                    );
                }
            }
        }
    }

    #[test]
    fn test_defaults_match_standard_deployment() {
        let params = MarketplaceParams::default();
        let plan = params.plan();

        assert_eq!(params.platform_fee_bps, 250);
        assert_eq!(params.escrow_period_ms, 86_400_000);
        assert_eq!(
            plan.contracts[0].args,
            vec![ArgumentProducer::literal(1_000_000_000_000u64)]
        );
        assert_eq!(plan.wiring.len(), 1);
        assert_eq!(plan.smoke_tests.len(), 4);
        assert_eq!(plan.smoke_tests[0].value, params.registration_fee);
        assert_eq!(
            plan.smoke_tests[3].args[4],
            ArgumentProducer::result_of("register verification key")
        );
    }

    #[test]
    fn test_hash_literals_are_32_byte_arrays() {
        let plan = MarketplaceParams::default().plan();
        let register = &plan.smoke_tests[0];
        let proof = &plan.smoke_tests[3];

        let hash = |arg: &ArgumentProducer| match arg {
            ArgumentProducer::Literal(value) => value.as_array().map(Vec::len),
            _ => None,
        };

        assert_eq!(hash(&register.args[2]), Some(32));
        assert_eq!(hash(&register.args[3]), Some(32));
        assert_eq!(register.args[3], ArgumentProducer::literal(vec![1u8; 32]));
        assert_eq!(hash(&proof.args[5]), Some(32));
    }
}
