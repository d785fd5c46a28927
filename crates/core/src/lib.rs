pub mod config;
pub mod model;
pub mod urls;

pub use config::{
    AppConfig, GatewayConfig, HostConfig, ListenerConfig, PresenceDefaults, SearchConfig,
};
pub use model::{
    Credential, InboundRequest, LocalPresenceState, NowPlayingEvent, ResolvedTrack,
    RICH_PRESENCE_CMD,
};
