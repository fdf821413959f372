pub mod m202610010001_create_users;
pub mod m202610010002_create_chats;
pub mod m202610010003_create_chat_members;
pub mod m202610010004_create_messages;
