pub mod resolver;

pub use resolver::{ProviderResolver, ResolvedModel};
