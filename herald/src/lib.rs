pub mod controller;
pub mod seed;

pub use controller::Herald;
pub use seed::CampaignSeed;
