pub mod frame;
pub mod gateway;
pub mod server;

pub use gateway::GatewayChannel;
pub use server::{bind_first_free, decode_request, Inbound, RpcServer};
