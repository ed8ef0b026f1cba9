use crate::domain::jobs::WhisperModel;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// One lazily loaded value per model size, kept for the life of the process.
///
/// The first load of a size blocks concurrent callers for that size only;
/// later reads are lock-free.
pub struct ModelCache<T> {
    cells: [OnceCell<Arc<T>>; 5],
}

impl<T> ModelCache<T> {
    pub const fn new() -> Self {
        Self {
            cells: [
                OnceCell::new(),
                OnceCell::new(),
                OnceCell::new(),
                OnceCell::new(),
                OnceCell::new(),
            ],
        }
    }

    pub fn get(&self, model: WhisperModel) -> Option<Arc<T>> {
        self.cells[model.index()].get().cloned()
    }

    /// Return the cached value, running `load` if this size was never loaded.
    /// A failed load leaves the slot empty so a later call can try again.
    pub fn get_or_try_load<E, F>(&self, model: WhisperModel, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.cells[model.index()]
            .get_or_try_init(|| load().map(Arc::new))
            .cloned()
    }
}

impl<T> Default for ModelCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
