pub mod bridge;
pub mod delivery;
pub mod dispatch;
pub mod domain;
pub mod gateway;
pub mod link;
pub mod ports;

#[cfg(test)]
pub(crate) mod testutil;

pub use domain::{
    Conversation, DeliveryStatus, IdentityLink, LinkStatus, Message, ModelInfo, ProactiveMessage,
    PromptTurn, Role, User, UserCredentials,
};
pub use ports::{
    ChannelTransport, ChatStore, CompletionRequest, CompletionService, InboundEvent, PortError,
    PortResult, UpdateBatch,
};
