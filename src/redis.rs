use crate::error::Result;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::TargetType;

#[derive(Clone)]
pub struct RedisClient {
    manager: Arc<Mutex<ConnectionManager>>,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.manager.lock().await;
        let _: () = conn.publish(channel, message).await?;
        Ok(())
    }

    // Real-time vote counts for other viewers of the same target
    pub async fn publish_vote_update(
        &self,
        target_id: Uuid,
        target_type: TargetType,
        upvotes: i32,
        downvotes: i32,
    ) -> Result<()> {
        let channel = format!("votes:{}", target_id);
        let message = json!({
            "type": "vote_update",
            "target_id": target_id,
            "target_type": target_type,
            "upvotes": upvotes,
            "downvotes": downvotes,
            "score": upvotes - downvotes,
        });

        self.publish(&channel, &message.to_string()).await
    }
}
