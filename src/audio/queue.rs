use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use crate::{
    error::{PlayerError, PlayerResult},
    sources::Track,
};

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub track: Track,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(track: Track, requested_by: UserId) -> Self {
        Self {
            track,
            requested_by,
            added_at: Utc::now(),
        }
    }

    pub fn url(&self) -> &str {
        &self.track.url
    }

    pub fn title(&self) -> &str {
        &self.track.title
    }
}

/// Cola FIFO de un servidor. La canción en reproducción ya no está aquí:
/// la cabeza de la cola es siempre la siguiente en sonar.
#[derive(Debug)]
pub struct MusicQueue {
    items: VecDeque<QueueItem>,
    max_size: usize,
}

impl MusicQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega un track al final y devuelve su posición (desde 1)
    pub fn enqueue(&mut self, item: QueueItem) -> PlayerResult<usize> {
        if self.items.len() >= self.max_size {
            return Err(PlayerError::QueueFull(self.max_size));
        }

        info!("➕ Agregado a la cola: {}", item.title());
        self.items.push_back(item);

        Ok(self.items.len())
    }

    /// Agrega varios tracks (playlist) hasta llenar la cola
    pub fn extend(&mut self, items: Vec<QueueItem>) -> usize {
        let available_space = self.max_size.saturating_sub(self.items.len());
        let to_add = items.len().min(available_space);

        self.items.extend(items.into_iter().take(to_add));

        info!("➕ Agregadas {} canciones a la cola", to_add);
        to_add
    }

    pub fn peek_head(&self) -> Option<&QueueItem> {
        self.items.front()
    }

    pub fn pop_head(&mut self) -> Option<QueueItem> {
        let next = self.items.pop_front();
        match &next {
            Some(item) => debug!("➡️ Siguiente en cola: {}", item.title()),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    /// Devuelve a la cabeza un track que no pudo empezar. No mira el
    /// límite: el track ya estaba contado.
    pub fn requeue_front(&mut self, item: QueueItem) {
        debug!("↩️ De vuelta a la cabeza: {}", item.title());
        self.items.push_front(item);
    }

    /// Elimina el track en `position` (desde 1)
    pub fn remove_at(&mut self, position: usize) -> PlayerResult<QueueItem> {
        let len = self.items.len();
        if position == 0 || position > len {
            return Err(PlayerError::OutOfRange {
                index: position,
                len,
            });
        }

        let removed = self
            .items
            .remove(position - 1)
            .ok_or(PlayerError::OutOfRange {
                index: position,
                len,
            })?;

        debug!("❌ Track eliminado en posición {}: {}", position, removed.title());
        Ok(removed)
    }

    /// Limpia la cola y devuelve cuántos tracks había
    pub fn clear(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        info!("🗑️ Cola limpiada ({} canciones)", removed);
        removed
    }

    /// Mezcla la cola
    pub fn shuffle(&mut self) {
        let mut items: Vec<_> = self.items.drain(..).collect();
        let mut rng = rand::thread_rng();
        items.shuffle(&mut rng);
        self.items.extend(items);
        info!("🔀 Cola mezclada");
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Títulos de los próximos `n` tracks
    pub fn upcoming(&self, n: usize) -> Vec<String> {
        self.items
            .iter()
            .take(n)
            .map(|item| item.title().to_string())
            .collect()
    }

    /// Obtiene información de la cola
    pub fn get_info(&self) -> QueueInfo {
        QueueInfo {
            items: self.items.iter().cloned().collect(),
            total_duration: self.items.iter().filter_map(|item| item.track.duration).sum(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub items: Vec<QueueItem>,
    pub total_duration: Duration,
}

impl QueueInfo {
    /// Obtiene una página específica de la cola
    pub fn get_page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let per_page = items_per_page.max(1);
        let total_pages = self.items.len().div_ceil(per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * per_page;
        let end = (start + per_page).min(self.items.len());

        QueuePage {
            items: self.items[start..end]
                .iter()
                .enumerate()
                .map(|(offset, item)| (start + offset + 1, item.clone()))
                .collect(),
            current_page,
            total_pages,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    /// (posición desde 1, track)
    pub items: Vec<(usize, QueueItem)>,
    pub current_page: usize,
    pub total_pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(n: usize) -> QueueItem {
        QueueItem::new(
            Track::new(format!("https://t/{}", n), format!("Track {}", n)),
            UserId::new(1),
        )
    }

    fn titles(queue: &MusicQueue) -> Vec<String> {
        queue.upcoming(usize::MAX)
    }

    #[test]
    fn fifo_order() {
        let mut queue = MusicQueue::new(10);
        assert_eq!(queue.enqueue(item(1)).unwrap(), 1);
        assert_eq!(queue.enqueue(item(2)).unwrap(), 2);

        assert_eq!(queue.pop_head().unwrap().title(), "Track 1");
        assert_eq!(queue.peek_head().unwrap().title(), "Track 2");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn enqueue_rejects_when_full() {
        let mut queue = MusicQueue::new(1);
        queue.enqueue(item(1)).unwrap();
        assert!(matches!(queue.enqueue(item(2)), Err(PlayerError::QueueFull(1))));
    }

    #[test]
    fn extend_stops_at_capacity() {
        let mut queue = MusicQueue::new(3);
        queue.enqueue(item(0)).unwrap();
        let added = queue.extend((1..=5).map(item).collect());
        assert_eq!(added, 2);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn remove_is_one_based() {
        let mut queue = MusicQueue::new(10);
        for n in 1..=3 {
            queue.enqueue(item(n)).unwrap();
        }

        let removed = queue.remove_at(2).unwrap();
        assert_eq!(removed.title(), "Track 2");
        assert_eq!(titles(&queue), vec!["Track 1", "Track 3"]);
    }

    #[test]
    fn remove_out_of_range_leaves_queue_unchanged() {
        let mut queue = MusicQueue::new(10);
        for n in 1..=3 {
            queue.enqueue(item(n)).unwrap();
        }

        for bad in [0, 4, 100] {
            match queue.remove_at(bad) {
                Err(PlayerError::OutOfRange { index, len }) => {
                    assert_eq!(index, bad);
                    assert_eq!(len, 3);
                }
                other => panic!("expected OutOfRange, got {:?}", other),
            }
        }
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn remove_on_empty_queue_reports_zero_length() {
        let mut queue = MusicQueue::new(10);
        assert!(matches!(
            queue.remove_at(1),
            Err(PlayerError::OutOfRange { index: 1, len: 0 })
        ));
    }

    #[test]
    fn clear_reports_removed_count() {
        let mut queue = MusicQueue::new(10);
        queue.extend((1..=4).map(item).collect());
        assert_eq!(queue.clear(), 4);
        assert!(queue.is_empty());
        assert!(queue.pop_head().is_none());
    }

    #[test]
    fn shuffle_keeps_all_items() {
        let mut queue = MusicQueue::new(100);
        queue.extend((1..=20).map(item).collect());
        queue.shuffle();

        let mut after = titles(&queue);
        after.sort();
        let mut expected: Vec<String> = (1..=20).map(|n| format!("Track {}", n)).collect();
        expected.sort();
        assert_eq!(after, expected);
    }

    #[test]
    fn pages_are_numbered_from_one() {
        let mut queue = MusicQueue::new(100);
        queue.extend((1..=12).map(item).collect());
        let info = queue.get_info();

        let page = info.get_page(2, 10);
        assert_eq!(page.current_page, 2);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].0, 11);

        // fuera de rango se ajusta a la última página
        assert_eq!(info.get_page(9, 10).current_page, 2);
    }

    #[test]
    fn empty_queue_has_one_empty_page() {
        let info = MusicQueue::new(10).get_info();
        let page = info.get_page(1, 10);
        assert_eq!(page.total_pages, 1);
        assert!(page.items.is_empty());
    }

    #[test]
    fn requeued_track_goes_back_to_the_head_even_when_full() {
        let mut queue = MusicQueue::new(2);
        queue.enqueue(item(1)).unwrap();
        queue.enqueue(item(2)).unwrap();

        let head = queue.pop_head().unwrap();
        queue.enqueue(item(3)).unwrap();
        queue.requeue_front(head);

        assert_eq!(queue.upcoming(3), vec!["Track 1", "Track 2", "Track 3"]);
    }
}
