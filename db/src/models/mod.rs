pub mod chat;
pub mod chat_member;
pub mod message;
pub mod user;

pub use chat::Entity as Chat;
pub use chat_member::Entity as ChatMember;
pub use message::Entity as Message;
pub use user::Entity as User;
