use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serenity::{
    builder::{CreateMessage, EditMessage},
    http::Http,
    model::id::{ChannelId, MessageId},
};
use std::sync::{Arc, OnceLock};

use super::{
    buttons::create_transport_buttons,
    embeds::{create_now_playing_embed, NowPlayingView},
};
use crate::audio::session::NowPlayingMessage;
use tracing::warn;

/// Lo que el reproductor necesita del chat: avisos de texto y el mensaje
/// "Reproduciendo" con sus botones.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn say(&self, channel_id: ChannelId, text: &str) -> Result<()>;

    async fn post_now_playing(&self, channel_id: ChannelId, view: &NowPlayingView) -> Result<MessageId>;

    async fn edit_now_playing(&self, message: NowPlayingMessage, view: &NowPlayingView) -> Result<()>;
}

/// Habla con Discord usando el mismo cliente HTTP que el bot, para
/// compartir su control de rate limits.
///
/// El reproductor se construye antes que el cliente de serenity, así que el
/// `Http` se enlaza después con [`SerenityGateway::bind`].
#[derive(Default)]
pub struct SerenityGateway {
    http: OnceLock<Arc<Http>>,
}

impl SerenityGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enlaza el cliente HTTP. Solo cuenta la primera llamada.
    pub fn bind(&self, http: Arc<Http>) {
        if self.http.set(http).is_err() {
            warn!("⚠️ El gateway ya tenía un cliente HTTP");
        }
    }

    fn http(&self) -> Result<&Arc<Http>> {
        self.http
            .get()
            .ok_or_else(|| anyhow!("Gateway sin cliente HTTP enlazado"))
    }
}

#[async_trait]
impl ChatGateway for SerenityGateway {
    async fn say(&self, channel_id: ChannelId, text: &str) -> Result<()> {
        channel_id.say(self.http()?, text).await?;
        Ok(())
    }

    async fn post_now_playing(&self, channel_id: ChannelId, view: &NowPlayingView) -> Result<MessageId> {
        let message = channel_id
            .send_message(
                self.http()?,
                CreateMessage::new()
                    .embed(create_now_playing_embed(view))
                    .components(create_transport_buttons(view.paused, view.looping, view.volume)),
            )
            .await?;
        Ok(message.id)
    }

    async fn edit_now_playing(&self, message: NowPlayingMessage, view: &NowPlayingView) -> Result<()> {
        message
            .channel_id
            .edit_message(
                self.http()?,
                message.message_id,
                EditMessage::new()
                    .embed(create_now_playing_embed(view))
                    .components(create_transport_buttons(view.paused, view.looping, view.volume)),
            )
            .await?;
        Ok(())
    }
}
