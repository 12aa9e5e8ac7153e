use anyhow::{anyhow, Result};
use rand::seq::SliceRandom;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage, EditMessage},
    model::{
        application::ComponentInteraction,
        channel::Message,
        id::{ChannelId, GuildId, MessageId, UserId},
    },
    prelude::Context,
};
use tracing::{error, info, warn};

use super::{
    commands::{self, BotCommand},
    JukeboxBot, PendingPrompt,
};
use crate::{
    audio::{queue::QueueItem, transport::TransportAction},
    error::{PlayerError, PlayerResult},
    sources::{classify, clean_video_url, is_url, playlist_url, video_id, watch_url, Track, TrackResolver},
    ui::{
        buttons::{create_playlist_buttons, create_search_buttons, create_transport_buttons, ControlId, PlaylistChoice},
        embeds::{
            create_help_embed, create_now_playing_embed, create_queue_embed, create_search_embed,
            playlist_done_text, playlist_loading_text, tracks_word,
        },
    },
};

/// Cada cuántas canciones se actualiza el mensaje de carga de una playlist
const PLAYLIST_CHUNK: usize = 5;

/// Maneja comandos de texto
pub async fn handle_message(ctx: &Context, msg: &Message, bot: &JukeboxBot) -> Result<()> {
    if msg.author.bot {
        return Ok(());
    }
    let Some(guild_id) = msg.guild_id else {
        return Ok(());
    };

    let command = match commands::parse(&msg.content, &bot.config.command_prefix) {
        None => return Ok(()),
        Some(Err(e)) => {
            msg.channel_id.say(&ctx.http, e.to_string()).await?;
            return Ok(());
        }
        Some(Ok(command)) => command,
    };

    info!(
        "📝 Comando {:?} usado por {} en guild {}",
        command, msg.author.name, guild_id
    );

    if let Err(e) = run_command(ctx, msg, bot, guild_id, command).await {
        report(ctx, msg.channel_id, e).await?;
    }

    Ok(())
}

/// Errores del reproductor se muestran tal cual; el resto se registra y se
/// muestra un mensaje genérico.
async fn report(ctx: &Context, channel_id: ChannelId, e: anyhow::Error) -> Result<()> {
    let text = match e.downcast_ref::<PlayerError>() {
        Some(player_error) => player_error.user_message(),
        None => {
            error!("Error ejecutando comando: {:?}", e);
            "❌ Ocurrió un error inesperado, inténtalo de nuevo".to_string()
        }
    };
    channel_id.say(&ctx.http, text).await?;
    Ok(())
}

async fn run_command(
    ctx: &Context,
    msg: &Message,
    bot: &JukeboxBot,
    guild_id: GuildId,
    command: BotCommand,
) -> Result<()> {
    let channel_id = msg.channel_id;
    let user_channel = user_voice_channel(ctx, guild_id, msg.author.id);

    match command {
        BotCommand::Play(query) => play(ctx, bot, guild_id, channel_id, msg.author.id, &query).await?,
        BotCommand::Skip => transport(ctx, bot, guild_id, channel_id, user_channel, TransportAction::Skip).await?,
        BotCommand::Pause => transport(ctx, bot, guild_id, channel_id, user_channel, TransportAction::Pause).await?,
        BotCommand::Resume => transport(ctx, bot, guild_id, channel_id, user_channel, TransportAction::Resume).await?,
        BotCommand::Stop => {
            bot.transport.stop(guild_id, user_channel).await?;
            channel_id
                .say(&ctx.http, "⏹️ Reproducción detenida y cola limpiada")
                .await?;
        }
        BotCommand::Queue { page } => {
            let info = bot.scheduler.queue_info(guild_id).await;
            let now_playing = bot.scheduler.now_playing(guild_id).await.map(|view| view.title);
            channel_id
                .send_message(
                    &ctx.http,
                    CreateMessage::new().embed(create_queue_embed(&info, page, now_playing.as_deref())),
                )
                .await?;
        }
        BotCommand::Remove(position) => {
            let removed = bot.scheduler.remove(guild_id, position).await?;
            channel_id
                .say(&ctx.http, format!("🗑️ Eliminada de la cola: **{}**", removed.title()))
                .await?;
        }
        BotCommand::Clear => {
            let cleared = bot.scheduler.clear(guild_id).await;
            channel_id
                .say(
                    &ctx.http,
                    format!("🧹 Cola limpiada ({} {})", cleared, tracks_word(cleared)),
                )
                .await?;
        }
        BotCommand::Shuffle => {
            let len = bot.scheduler.shuffle(guild_id).await;
            let text = if len == 0 {
                "📭 ¡La cola está vacía!".to_string()
            } else {
                format!("🔀 Cola mezclada ({} {})", len, tracks_word(len))
            };
            channel_id.say(&ctx.http, text).await?;
        }
        BotCommand::NowPlaying => {
            let view = bot
                .scheduler
                .now_playing(guild_id)
                .await
                .ok_or(PlayerError::NothingPlaying)?;
            channel_id
                .send_message(
                    &ctx.http,
                    CreateMessage::new()
                        .embed(create_now_playing_embed(&view))
                        .components(create_transport_buttons(view.paused, view.looping, view.volume)),
                )
                .await?;
        }
        BotCommand::Join => {
            let voice = ensure_voice(ctx, bot, guild_id, msg.author.id, channel_id).await?;
            channel_id
                .say(&ctx.http, format!("🔊 Conectado a <#{}>", voice))
                .await?;
        }
        BotCommand::Leave => {
            leave(ctx, bot, guild_id).await?;
            channel_id
                .say(&ctx.http, "👋 Desconectado del canal de voz")
                .await?;
        }
        BotCommand::Help => {
            channel_id
                .send_message(
                    &ctx.http,
                    CreateMessage::new().embed(create_help_embed(&bot.config.command_prefix)),
                )
                .await?;
        }
    }

    Ok(())
}

async fn transport(
    ctx: &Context,
    bot: &JukeboxBot,
    guild_id: GuildId,
    channel_id: ChannelId,
    user_channel: Option<ChannelId>,
    action: TransportAction,
) -> Result<()> {
    let outcome = bot.transport.apply(guild_id, user_channel, action).await?;
    channel_id.say(&ctx.http, outcome.message()).await?;
    Ok(())
}

/// `play`: enlace directo, aviso de playlist o buscador con botones.
async fn play(
    ctx: &Context,
    bot: &JukeboxBot,
    guild_id: GuildId,
    channel_id: ChannelId,
    user_id: UserId,
    query: &str,
) -> Result<()> {
    ensure_voice(ctx, bot, guild_id, user_id, channel_id).await?;

    if !is_url(query) {
        return search_prompt(ctx, bot, channel_id, user_id, query).await;
    }

    let kind = classify(query);
    if let (true, Some(playlist_id)) = (kind.is_playlist, kind.playlist_id) {
        let video = video_id(query);
        match create_playlist_buttons(&playlist_id, video.as_deref()) {
            Some(buttons) => {
                let message = channel_id
                    .send_message(
                        &ctx.http,
                        CreateMessage::new()
                            .content("📑 **Este enlace es parte de una playlist.** ¿Qué quieres reproducir?")
                            .components(buttons),
                    )
                    .await?;
                register_prompt(ctx, bot, channel_id, message.id, user_id);
                return Ok(());
            }
            None => {
                warn!("⚠️ Id de playlist demasiado largo en guild {}: {} caracteres", guild_id, playlist_id.len());
                let Some(id) = video else {
                    channel_id.say(&ctx.http, "❌ El id de la playlist es demasiado largo").await?;
                    return Ok(());
                };
                channel_id
                    .say(&ctx.http, "⚠️ El id de la playlist es demasiado largo, se reproduce solo esta canción")
                    .await?;
                return enqueue_url(ctx, bot, guild_id, channel_id, user_id, &watch_url(&id)).await;
            }
        }
    }

    enqueue_url(ctx, bot, guild_id, channel_id, user_id, &clean_video_url(query)).await
}

async fn search_prompt(
    ctx: &Context,
    bot: &JukeboxBot,
    channel_id: ChannelId,
    user_id: UserId,
    query: &str,
) -> Result<()> {
    let hits = bot.search.search(query, bot.config.search_results).await?;
    let buttons = create_search_buttons(&hits);
    if buttons.is_empty() {
        channel_id
            .say(&ctx.http, format!("❌ No se encontraron resultados para «{}»", query))
            .await?;
        return Ok(());
    }

    let message = channel_id
        .send_message(
            &ctx.http,
            CreateMessage::new()
                .embed(create_search_embed(query, &hits))
                .components(buttons),
        )
        .await?;
    register_prompt(ctx, bot, channel_id, message.id, user_id);
    Ok(())
}

async fn enqueue_url(
    ctx: &Context,
    bot: &JukeboxBot,
    guild_id: GuildId,
    channel_id: ChannelId,
    user_id: UserId,
    url: &str,
) -> Result<()> {
    let track = bot.resolver.describe(url).await?;
    let title = track.title.clone();
    let outcome = bot
        .scheduler
        .enqueue(guild_id, QueueItem::new(track, user_id))
        .await?;

    // Si arrancó, el mensaje "Reproduciendo" ya lo anuncia
    if !outcome.started {
        channel_id
            .say(
                &ctx.http,
                format!("➕ Agregado a la cola: **{}** (posición {})", title, outcome.position),
            )
            .await?;
    }
    Ok(())
}

/// Carga una playlist en tandas, editando el mensaje de progreso, y arranca
/// la reproducción en cuanto entra la primera tanda.
#[allow(clippy::too_many_arguments)]
async fn load_playlist(
    ctx: &Context,
    bot: &JukeboxBot,
    guild_id: GuildId,
    channel_id: ChannelId,
    message_id: MessageId,
    user_id: UserId,
    playlist_id: &str,
    shuffled: bool,
) -> Result<()> {
    ensure_voice(ctx, bot, guild_id, user_id, channel_id).await?;

    let playlist = bot
        .resolver
        .enumerate_playlist(&playlist_url(playlist_id), bot.config.max_playlist_size)
        .await?;
    let title = playlist.title;
    let mut entries = playlist.entries;
    if shuffled {
        entries.shuffle(&mut rand::thread_rng());
    }

    let total = entries.len();
    let mut processed = 0;
    let mut added = 0;
    let mut started = false;

    for chunk in entries.chunks(PLAYLIST_CHUNK) {
        let items: Vec<QueueItem> = chunk
            .iter()
            .map(|entry| QueueItem::new(Track::new(entry.url.clone(), entry.title.clone()), user_id))
            .collect();
        let accepted = bot.scheduler.extend(guild_id, items).await;
        processed += chunk.len();
        added += accepted;

        if !started && added > 0 {
            started = true;
            let scheduler = bot.scheduler.clone();
            tokio::spawn(async move { scheduler.ensure_playing(guild_id).await });
        }

        edit_text(ctx, channel_id, message_id, playlist_loading_text(&title, processed, total, shuffled)).await;

        if accepted < chunk.len() {
            warn!("⚠️ Cola llena en guild {}, playlist cortada en {}", guild_id, added);
            break;
        }
    }

    info!("📑 Playlist «{}» cargada en guild {}: {} de {}", title, guild_id, added, total);
    edit_text(ctx, channel_id, message_id, playlist_done_text(&title, added, shuffled)).await;
    Ok(())
}

async fn edit_text(ctx: &Context, channel_id: ChannelId, message_id: MessageId, text: String) {
    let edit = EditMessage::new().content(text).embeds(vec![]).components(vec![]);
    if let Err(e) = channel_id.edit_message(&ctx.http, message_id, edit).await {
        warn!("⚠️ No se pudo editar el mensaje {}: {}", message_id, e);
    }
}

/// Maneja interacciones con botones
pub async fn handle_component(ctx: &Context, component: &ComponentInteraction, bot: &JukeboxBot) -> Result<()> {
    let Some(guild_id) = component.guild_id else {
        return Ok(());
    };
    let Some(control) = ControlId::parse(&component.data.custom_id) else {
        return Ok(());
    };

    info!(
        "🔘 Botón {} presionado por {} en guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    let user_id = component.user.id;
    let channel_id = component.channel_id;

    match control {
        ControlId::Transport(action) => {
            let user_channel = user_voice_channel(ctx, guild_id, user_id);
            let text = match bot.transport.apply(guild_id, user_channel, action).await {
                Ok(outcome) => outcome.message(),
                Err(e) => e.user_message(),
            };
            respond_ephemeral(ctx, component, text).await?;
        }
        ControlId::Pick { url } => {
            if !claim_prompt(ctx, component, bot).await? {
                return Ok(());
            }
            close_prompt(ctx, component, "🎵 Canción elegida, cargando...".to_string()).await?;
            if let Err(e) = pick_track(ctx, bot, guild_id, channel_id, user_id, &url).await {
                report(ctx, channel_id, e).await?;
            }
        }
        ControlId::Playlist {
            choice,
            playlist_id,
            video_id: video,
        } => {
            if !claim_prompt(ctx, component, bot).await? {
                return Ok(());
            }

            let result = match choice {
                PlaylistChoice::Cancel => {
                    close_prompt(ctx, component, "❌ Selección cancelada".to_string()).await?;
                    Ok(())
                }
                PlaylistChoice::Single => {
                    close_prompt(ctx, component, "🎵 Cargando solo esta canción...".to_string()).await?;
                    match video {
                        Some(id) => pick_track(ctx, bot, guild_id, channel_id, user_id, &watch_url(&id)).await,
                        None => Ok(()),
                    }
                }
                PlaylistChoice::All | PlaylistChoice::Shuffled => {
                    let shuffled = choice == PlaylistChoice::Shuffled;
                    close_prompt(ctx, component, "📑 Cargando playlist...".to_string()).await?;
                    load_playlist(
                        ctx,
                        bot,
                        guild_id,
                        channel_id,
                        component.message.id,
                        user_id,
                        &playlist_id,
                        shuffled,
                    )
                    .await
                }
            };

            if let Err(e) = result {
                report(ctx, channel_id, e).await?;
            }
        }
    }

    Ok(())
}

async fn pick_track(
    ctx: &Context,
    bot: &JukeboxBot,
    guild_id: GuildId,
    channel_id: ChannelId,
    user_id: UserId,
    url: &str,
) -> Result<()> {
    ensure_voice(ctx, bot, guild_id, user_id, channel_id).await?;
    enqueue_url(ctx, bot, guild_id, channel_id, user_id, url).await
}

/// Consume la selección pendiente si quien pulsa es su autor.
async fn claim_prompt(ctx: &Context, component: &ComponentInteraction, bot: &JukeboxBot) -> Result<bool> {
    let message_id = component.message.id;
    let user_id = component.user.id;

    if bot
        .prompts
        .remove_if(&message_id, |_, prompt| prompt.author == user_id)
        .is_some()
    {
        return Ok(true);
    }

    let text = if bot.prompts.contains_key(&message_id) {
        "❌ Solo quien hizo la búsqueda puede elegir"
    } else {
        "⏰ Esta selección ya expiró"
    };
    respond_ephemeral(ctx, component, text.to_string()).await?;
    Ok(false)
}

/// Registra una selección y la caduca pasado el tiempo configurado.
fn register_prompt(ctx: &Context, bot: &JukeboxBot, channel_id: ChannelId, message_id: MessageId, author: UserId) {
    bot.prompts.insert(message_id, PendingPrompt { author });

    let prompts = bot.prompts.clone();
    let http = ctx.http.clone();
    let timeout = bot.config.prompt_timeout();
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if prompts.remove(&message_id).is_some() {
            let edit = EditMessage::new()
                .content("⏰ Tiempo de selección agotado")
                .embeds(vec![])
                .components(vec![]);
            if let Err(e) = channel_id.edit_message(&http, message_id, edit).await {
                warn!("⚠️ No se pudo cerrar la selección {}: {}", message_id, e);
            }
        }
    });
}

async fn respond_ephemeral(ctx: &Context, component: &ComponentInteraction, text: String) -> Result<()> {
    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(text)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

/// Reemplaza el mensaje de la selección y le quita los botones.
async fn close_prompt(ctx: &Context, component: &ComponentInteraction, text: String) -> Result<()> {
    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new()
                    .content(text)
                    .embeds(vec![])
                    .components(vec![]),
            ),
        )
        .await?;
    Ok(())
}

/// Conecta al bot al canal del usuario, o comprueba que ya estén juntos.
async fn ensure_voice(
    ctx: &Context,
    bot: &JukeboxBot,
    guild_id: GuildId,
    user_id: UserId,
    text_channel: ChannelId,
) -> PlayerResult<ChannelId> {
    let user_channel = user_voice_channel(ctx, guild_id, user_id);

    if let Some(bot_channel) = bot.scheduler.voice_channel(guild_id).await {
        bot.transport.authorize(guild_id, user_channel).await?;
        bot.scheduler.set_text_channel(guild_id, text_channel).await;
        return Ok(bot_channel);
    }

    let channel = user_channel.ok_or(PlayerError::NotInVoice)?;
    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| PlayerError::Transport("Songbird no inicializado".to_string()))?;

    manager
        .join(guild_id, channel)
        .await
        .map_err(|e| PlayerError::Transport(format!("no se pudo entrar al canal de voz: {}", e)))?;

    bot.scheduler.attach(guild_id, channel, text_channel).await;
    info!("🔊 Conectado al canal de voz {} en guild {}", channel, guild_id);
    Ok(channel)
}

async fn leave(ctx: &Context, bot: &JukeboxBot, guild_id: GuildId) -> Result<()> {
    if bot.scheduler.voice_channel(guild_id).await.is_none() {
        return Err(PlayerError::NotConnected.into());
    }

    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow!("Songbird no inicializado"))?;

    bot.scheduler.detach(guild_id).await;
    manager.remove(guild_id).await?;

    info!("👋 Desconectado del canal de voz en guild {}", guild_id);
    Ok(())
}

// Funciones auxiliares

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    let channel = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id);
    channel
}
