use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Выбор воркера для элемента.
///
/// Реализация обязана быть стабильной: элементы с одинаковым ключом
/// всегда попадают в одну и ту же очередь, иначе теряется порядок.
pub trait Router<T>: Send + Sync {
    fn route(&self, item: &T, workers: usize) -> usize;
}

/// Элемент с ключом маршрутизации.
pub trait Routable {
    type Key: Hash + ?Sized;

    fn routing_key(&self) -> &Self::Key;
}

/// Роутинг по хэшу ключа: `hash(key) % workers`.
///
/// `DefaultHasher::new()` детерминирован, поэтому распределение
/// одинаково между запусками процесса.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashRouter;

impl<T: Routable> Router<T> for HashRouter {
    fn route(&self, item: &T, workers: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        item.routing_key().hash(&mut hasher);
        (hasher.finish() % workers.max(1) as u64) as usize
    }
}
