pub mod traits;
pub mod search;
pub mod mutation;
pub mod resource;
pub mod manager;

pub use manager::{AppConfig, ConfigManager};
pub use mutation::MutationConfig;
pub use resource::ResourceConfig;
pub use search::{SearchConfig, StoppingCriterion};
pub use traits::ConfigSection;
