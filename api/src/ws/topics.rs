use uuid::Uuid;

/// Fan-out topic for everything happening inside one chat.
pub fn chat_topic(chat_id: Uuid) -> String {
    format!("chat:{chat_id}")
}

/// Personal topic; presence changes of a user's contacts land here.
pub fn user_topic(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_namespaced() {
        let id = Uuid::nil();
        assert_eq!(chat_topic(id), "chat:00000000-0000-0000-0000-000000000000");
        assert_eq!(user_topic(id), "user:00000000-0000-0000-0000-000000000000");
    }
}
