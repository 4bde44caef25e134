//! Domain entities - Core business objects with no external dependencies

pub mod command;
pub mod message;
pub mod projection;
pub mod quote;
pub mod user;

pub use command::{CommandFn, CommandFuture, CommandTable};
pub use message::{Message, MessageAuthor, Platform};
pub use projection::{ChannelView, Destination, MessageView, OutboundMessage, OutboundSender, UserView};
pub use quote::Quote;
pub use user::User;
