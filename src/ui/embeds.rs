use serenity::{
    all::{Colour, Timestamp},
    builder::{CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter},
    model::id::UserId,
};
use std::time::Duration;

use crate::{audio::queue::QueueInfo, sources::SearchHit};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const PLAYING_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const LOOP_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const PAUSED_ORANGE: Colour = Colour::from_rgb(230, 126, 34);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Jukebox";

const PROGRESS_CELLS: usize = 16;
const VOLUME_CELLS: usize = 10;

/// Foto fija de la sesión actual para pintar el mensaje "Reproduciendo".
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingView {
    pub title: String,
    pub url: String,
    pub thumbnail: Option<String>,
    pub requested_by: Option<UserId>,
    pub elapsed: Duration,
    pub duration: Option<Duration>,
    pub paused: bool,
    pub looping: bool,
    pub volume: f32,
    /// Títulos de la cabeza de la cola, en orden (como mucho 4).
    pub upcoming: Vec<String>,
    pub queue_len: usize,
}

impl NowPlayingView {
    pub fn remaining(&self) -> Option<Duration> {
        self.duration.map(|total| total.saturating_sub(self.elapsed))
    }

    pub fn colour(&self) -> Colour {
        if self.paused {
            colors::PAUSED_ORANGE
        } else if self.looping {
            colors::LOOP_GREEN
        } else {
            colors::PLAYING_BLUE
        }
    }
}

/// `mm:ss` (los minutos pueden pasar de 59)
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Barra de progreso: `` `01:05` `━━━⬤────────────` `-02:10` ``
pub fn progress_bar(elapsed: Duration, duration: Option<Duration>) -> String {
    let progress = match duration {
        Some(total) if !total.is_zero() => (elapsed.as_secs_f64() / total.as_secs_f64()).min(1.0),
        _ => 0.0,
    };
    let filled = (PROGRESS_CELLS as f64 * progress) as usize;

    let bar = if filled == 0 {
        format!("○{}", "─".repeat(PROGRESS_CELLS - 1))
    } else if filled >= PROGRESS_CELLS {
        format!("{}⬤", "━".repeat(PROGRESS_CELLS - 1))
    } else {
        format!(
            "{}⬤{}",
            "━".repeat(filled - 1),
            "─".repeat(PROGRESS_CELLS - filled)
        )
    };

    let remaining = match duration {
        Some(total) => format!("-{}", format_clock(total.saturating_sub(elapsed))),
        None => "∞".to_string(),
    };

    format!("`{}` `{}` `{}`", format_clock(elapsed), bar, remaining)
}

pub fn volume_icon(volume: f32) -> &'static str {
    if volume >= 0.75 {
        "🔊"
    } else if volume >= 0.4 {
        "🔉"
    } else if volume > 0.0 {
        "🔈"
    } else {
        "🔇"
    }
}

/// Crea una barra visual de volumen
pub fn volume_bar(volume: f32) -> String {
    let mut filled = ((volume.clamp(0.0, 1.0) * VOLUME_CELLS as f32) as usize).min(VOLUME_CELLS);
    if filled == 0 && volume > 0.0 {
        filled = 1;
    }
    format!("{}{}", "█".repeat(filled), "░".repeat(VOLUME_CELLS - filled))
}

/// `🔉 `█████░░░░░` **50%**`
pub fn volume_line(volume: f32) -> String {
    format!(
        "{} `{}` **{}%**",
        volume_icon(volume),
        volume_bar(volume),
        (volume * 100.0).round() as u32
    )
}

/// Barra de carga de playlists: `` `━━━━━⦿┈┈┈┈┈┈┈┈┈┈` **37%** ``
pub fn loading_bar(current: usize, total: usize) -> String {
    let total = total.max(1);
    let current = current.min(total);
    let filled = PROGRESS_CELLS * current / total;

    let bar = if filled == 0 {
        format!("○{}", "┈".repeat(PROGRESS_CELLS - 1))
    } else if filled == PROGRESS_CELLS {
        format!("{}●", "━".repeat(PROGRESS_CELLS - 1))
    } else {
        format!(
            "{}⦿{}",
            "━".repeat(filled - 1),
            "┈".repeat(PROGRESS_CELLS - filled)
        )
    };

    format!("`{}` **{}%**", bar, 100 * current / total)
}

pub fn tracks_word(count: usize) -> &'static str {
    if count == 1 {
        "canción"
    } else {
        "canciones"
    }
}

/// Crea el embed del reproductor
pub fn create_now_playing_embed(view: &NowPlayingView) -> CreateEmbed {
    let mut description = vec![
        format!("**[{}]({})**", view.title, view.url),
        String::new(),
        progress_bar(view.elapsed, view.duration),
    ];

    if let Some(next) = view.upcoming.first() {
        description.push(String::new());
        description.push("─".repeat(20));
        description.push(format!("⏩ **Siguiente**\n`→` {}", next));
    }

    let mut status = Vec::new();
    if view.looping {
        status.push("🔁 Repetición activada");
    }
    status.push(if view.paused { "⏸️ En pausa" } else { "▶️ Reproduciendo" });

    let mut embed = CreateEmbed::default()
        .author(CreateEmbedAuthor::new("Reproductor de música"))
        .description(description.join("\n"))
        .color(view.colour())
        .field("🎵 Estado", status.join(" • "), true)
        .field("🔊 Volumen", volume_line(view.volume), true);

    if let Some(user) = view.requested_by {
        embed = embed.field("👤 Pedida por", format!("<@{}>", user), true);
    }

    let later: Vec<String> = view
        .upcoming
        .iter()
        .skip(1)
        .take(3)
        .enumerate()
        .map(|(i, title)| format!("`{}.` {}", i + 2, title))
        .collect();

    if !later.is_empty() {
        let mut value = later.join("\n");
        let shown = 1 + later.len();
        if view.queue_len > shown {
            let more = view.queue_len - shown;
            value.push_str(&format!(
                "\n`─────`\nY **{}** {} más en cola",
                more,
                tracks_word(more)
            ));
        }
        embed = embed.field("📑 En cola", value, false);
    }

    if let Some(thumbnail) = &view.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    let mut footer = Vec::new();
    if let Some(duration) = view.duration {
        footer.push(format!("⏱️ {}", format_duration(duration)));
    }
    if view.queue_len > 0 {
        footer.push(format!(
            "📑 {} {} en cola",
            view.queue_len,
            tracks_word(view.queue_len)
        ));
    } else {
        footer.push("📑 Cola vacía".to_string());
    }
    if view.looping {
        footer.push("🔁 Repetición".to_string());
    }

    embed
        .footer(CreateEmbedFooter::new(footer.join(" • ")))
        .timestamp(Timestamp::now())
}

/// Texto de la lista de la cola; `None` si está vacía.
pub fn queue_description(queue_info: &QueueInfo, page: usize, items_per_page: usize) -> Option<(String, String)> {
    if queue_info.items.is_empty() {
        return None;
    }

    let queue_page = queue_info.get_page(page, items_per_page);
    let mut lines = Vec::with_capacity(queue_page.items.len());

    for (position, item) in &queue_page.items {
        let duration = item
            .track
            .duration
            .map(|d| format!(" `[{}]`", format_duration(d)))
            .unwrap_or_default();
        lines.push(format!("**{}**. {}{}", position, item.title(), duration));
    }

    let mut footer = format!(
        "{} {}",
        queue_info.items.len(),
        tracks_word(queue_info.items.len())
    );
    if !queue_info.total_duration.is_zero() {
        footer.push_str(&format!(" • {}", format_duration(queue_info.total_duration)));
    }
    if queue_page.total_pages > 1 {
        footer.push_str(&format!(
            " • Página {} de {}",
            queue_page.current_page, queue_page.total_pages
        ));
    }

    Some((lines.join("\n"), footer))
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(queue_info: &QueueInfo, page: usize, now_playing: Option<&str>) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📜 Cola de reproducción")
        .color(colors::PLAYING_BLUE);

    if let Some(title) = now_playing {
        embed = embed.field("▶️ Sonando", format!("**{}**", title), false);
    }

    match queue_description(queue_info, page, 10) {
        Some((list, footer)) => embed
            .field("Próximas canciones", list, false)
            .footer(CreateEmbedFooter::new(footer)),
        None => embed
            .description("📭 **¡La cola está vacía!**")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER)),
    }
    .timestamp(Timestamp::now())
}

/// Resultados de búsqueda numerados (los botones llevan el mismo número)
pub fn create_search_embed(query: &str, hits: &[SearchHit]) -> CreateEmbed {
    let lines: Vec<String> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let mut line = format!("**{}.** {}", i + 1, hit.title);
            if let Some(channel) = &hit.channel {
                line.push_str(&format!("\n　👤 {}", channel));
            }
            if let Some(duration) = hit.duration {
                line.push_str(&format!(" • ⏱️ {}", format_duration(duration)));
            }
            line
        })
        .collect();

    CreateEmbed::default()
        .title(format!("🔎 Resultados para «{}»", query))
        .description(lines.join("\n\n"))
        .color(colors::PLAYING_BLUE)
        .footer(CreateEmbedFooter::new("Elige una canción con los botones"))
}

/// Crea un embed de ayuda general
pub fn create_help_embed(prefix: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Jukebox - Comandos")
        .color(colors::PLAYING_BLUE)
        .field(
            "🎵 Reproducción",
            format!(
                "• `{p}play <búsqueda|enlace>` (`{p}p`) - Añade una canción o playlist\n\
                • `{p}pause` / `{p}resume` - Pausa o reanuda\n\
                • `{p}skip` (`{p}s`) - Salta la canción actual\n\
                • `{p}stop` - Detiene y vacía la cola\n\
                • `{p}nowplaying` (`{p}np`) - Muestra el reproductor",
                p = prefix
            ),
            false,
        )
        .field(
            "📜 Cola",
            format!(
                "• `{p}queue [página]` (`{p}q`) - Muestra la cola\n\
                • `{p}remove <n>` - Quita la canción en la posición n\n\
                • `{p}clear` - Vacía la cola\n\
                • `{p}shuffle` - Mezcla la cola",
                p = prefix
            ),
            false,
        )
        .field(
            "🔊 Conexión",
            format!(
                "• `{p}join` - Entra a tu canal de voz\n\
                • `{p}leave` - Sale del canal de voz",
                p = prefix
            ),
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn playlist_loading_text(title: &str, loaded: usize, total: usize, shuffled: bool) -> String {
    let status = if shuffled { "🔀 Mezclando" } else { "⏳ Cargando" };
    format!(
        "🎵 **{}**\n{}\n{} canciones\n{}\n📥 **{}** de **{}**",
        title,
        "┄".repeat(28),
        status,
        loading_bar(loaded, total),
        loaded,
        total
    )
}

pub fn playlist_done_text(title: &str, added: usize, shuffled: bool) -> String {
    let mode = if shuffled { "🔀 Mezclada" } else { "📑 En orden" };
    format!(
        "✅ **Playlist cargada**\n{}\n🎵 **{}**\n📥 **{}** {} | {}",
        "┄".repeat(28),
        title,
        added,
        tracks_word(added),
        mode
    )
}
