use serenity::{
    all::{ButtonStyle, ReactionType},
    builder::{CreateActionRow, CreateButton},
};

use super::embeds::volume_icon;
use crate::{audio::transport::TransportAction, sources::SearchHit};

/// Discord limita los custom ids a 100 caracteres.
const MAX_CUSTOM_ID: usize = 100;
const PREFIX: &str = "jb";

/// Qué hacer con un enlace que trae `list=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistChoice {
    /// Solo el vídeo del enlace
    Single,
    All,
    Shuffled,
    Cancel,
}

impl PlaylistChoice {
    fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::All => "all",
            Self::Shuffled => "shuffle",
            Self::Cancel => "cancel",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Self::Single),
            "all" => Some(Self::All),
            "shuffle" => Some(Self::Shuffled),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// Contenido del custom id de cada botón del bot.
///
/// Todo lo que el botón necesita viaja en el id, fijado al crear el botón.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlId {
    Transport(TransportAction),
    Pick {
        url: String,
    },
    Playlist {
        choice: PlaylistChoice,
        playlist_id: String,
        video_id: Option<String>,
    },
}

impl ControlId {
    pub fn encode(&self) -> String {
        match self {
            Self::Transport(action) => format!("{}:tx:{}", PREFIX, action.as_str()),
            Self::Pick { url } => format!("{}:pick:{}", PREFIX, url),
            Self::Playlist {
                choice,
                playlist_id,
                video_id,
            } => format!(
                "{}:pl:{}:{}:{}",
                PREFIX,
                choice.as_str(),
                playlist_id,
                video_id.as_deref().unwrap_or("")
            ),
        }
    }

    pub fn parse(custom_id: &str) -> Option<Self> {
        let mut parts = custom_id.splitn(3, ':');
        if parts.next()? != PREFIX {
            return None;
        }

        match (parts.next()?, parts.next()?) {
            ("tx", action) => TransportAction::parse(action).map(Self::Transport),
            ("pick", url) if !url.is_empty() => Some(Self::Pick {
                url: url.to_string(),
            }),
            ("pl", rest) => {
                let mut fields = rest.splitn(3, ':');
                let choice = PlaylistChoice::parse(fields.next()?)?;
                let playlist_id = fields.next()?.to_string();
                let video_id = fields
                    .next()
                    .filter(|id| !id.is_empty())
                    .map(str::to_string);
                Some(Self::Playlist {
                    choice,
                    playlist_id,
                    video_id,
                })
            }
            _ => None,
        }
    }
}

/// Controles del reproductor: pausa/reanudar, saltar, volumen, repetición
pub fn create_transport_buttons(paused: bool, looping: bool, volume: f32) -> Vec<CreateActionRow> {
    let pause_btn = CreateButton::new(ControlId::Transport(TransportAction::TogglePause).encode())
        .emoji(if paused { '▶' } else { '⏸' })
        .style(if paused {
            ButtonStyle::Success
        } else {
            ButtonStyle::Secondary
        });

    let skip_btn = CreateButton::new(ControlId::Transport(TransportAction::Skip).encode())
        .emoji('⏭')
        .style(ButtonStyle::Secondary);

    let volume_btn = CreateButton::new(ControlId::Transport(TransportAction::CycleVolume).encode())
        .emoji(ReactionType::Unicode(volume_icon(volume).to_string()))
        .style(ButtonStyle::Secondary);

    let loop_btn = CreateButton::new(ControlId::Transport(TransportAction::ToggleLoop).encode())
        .emoji('🔁')
        .style(if looping {
            ButtonStyle::Success
        } else {
            ButtonStyle::Secondary
        });

    vec![CreateActionRow::Buttons(vec![
        pause_btn, skip_btn, volume_btn, loop_btn,
    ])]
}

/// Botones numerados para los resultados de búsqueda.
///
/// Los resultados cuyo id no cabe en el límite de Discord se omiten, igual
/// que los duplicados.
pub fn create_search_buttons(hits: &[SearchHit]) -> Vec<CreateActionRow> {
    let mut seen = Vec::new();
    let buttons: Vec<CreateButton> = hits
        .iter()
        .enumerate()
        .filter_map(|(i, hit)| {
            let custom_id = ControlId::Pick {
                url: hit.url.clone(),
            }
            .encode();
            if custom_id.len() > MAX_CUSTOM_ID || seen.contains(&custom_id) {
                return None;
            }
            seen.push(custom_id.clone());
            Some(
                CreateButton::new(custom_id)
                    .label((i + 1).to_string())
                    .style(ButtonStyle::Primary),
            )
        })
        .take(5)
        .collect();

    if buttons.is_empty() {
        Vec::new()
    } else {
        vec![CreateActionRow::Buttons(buttons)]
    }
}

/// Botones del aviso de playlist.
///
/// `None` si los ids no caben en el límite de Discord (un `list=` absurdo).
pub fn create_playlist_buttons(playlist_id: &str, video_id: Option<&str>) -> Option<Vec<CreateActionRow>> {
    let id = |choice| {
        ControlId::Playlist {
            choice,
            playlist_id: playlist_id.to_string(),
            video_id: video_id.map(str::to_string),
        }
        .encode()
    };

    // "shuffle" es la opción más larga
    if id(PlaylistChoice::Shuffled).len() > MAX_CUSTOM_ID {
        return None;
    }

    let mut buttons = Vec::new();
    if video_id.is_some() {
        buttons.push(
            CreateButton::new(id(PlaylistChoice::Single))
                .label("Solo esta canción")
                .emoji('🎵')
                .style(ButtonStyle::Primary),
        );
    }
    buttons.push(
        CreateButton::new(id(PlaylistChoice::All))
            .label("Playlist completa")
            .emoji('📑')
            .style(ButtonStyle::Success),
    );
    buttons.push(
        CreateButton::new(id(PlaylistChoice::Shuffled))
            .label("Mezclada")
            .emoji('🔀')
            .style(ButtonStyle::Success),
    );
    buttons.push(
        CreateButton::new(id(PlaylistChoice::Cancel))
            .label("Cancelar")
            .emoji('❌')
            .style(ButtonStyle::Danger),
    );

    Some(vec![CreateActionRow::Buttons(buttons)])
}
