pub mod settings;

pub use settings::{
    AttachmentLimits, AuthConfig, AuthToken, GatewayConfig, Provider, ProviderKind, ServerConfig,
    Settings,
};
