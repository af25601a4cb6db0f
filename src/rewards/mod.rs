//! Reward settings, code minting, threshold evaluation and redemption.

pub mod approver;
pub mod code;
pub mod engine;
pub mod redemption;
pub mod settings;

pub use approver::{ApproverValidator, PinApprover, StaticPinValidator};
pub use code::CodeGenerator;
pub use engine::{CardFailure, CardOutcome, Ineligibility, RewardEngine, RewardEvaluation};
pub use redemption::RedemptionService;
pub use settings::{RewardSettings, SettingsService};
