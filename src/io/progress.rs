use std::sync::{Mutex, OnceLock};

#[derive(Clone, Debug, PartialEq)]
pub enum ConvertProgress {
    Stage(&'static str),
    Chunks { done: usize, total: usize, percent: f32 },
    Segments { done: usize, total: usize },
    Batch { done: usize, total: usize },
    Finished,
}

type ProgressCallback = Box<dyn Fn(ConvertProgress) + Send + 'static>;

static CONVERT_PROGRESS_CB: OnceLock<Mutex<Option<ProgressCallback>>> = OnceLock::new();

/// Installs (or replaces) the process-wide progress callback.
pub fn set_convert_progress_callback(cb: impl Fn(ConvertProgress) + Send + 'static) {
    let slot = CONVERT_PROGRESS_CB.get_or_init(|| Mutex::new(None));
    if let Ok(mut g) = slot.lock() {
        *g = Some(Box::new(cb));
    }
}

pub fn clear_convert_progress_callback() {
    if let Some(m) = CONVERT_PROGRESS_CB.get() {
        if let Ok(mut g) = m.lock() {
            *g = None;
        }
    }
}

pub fn emit_convert_progress(p: ConvertProgress) {
    if let Some(m) = CONVERT_PROGRESS_CB.get() {
        if let Ok(g) = m.lock() {
            if let Some(cb) = &*g {
                cb(p);
            }
        }
    }
}

pub(crate) fn emit_chunks(done: usize, total: usize) {
    let percent = if total == 0 {
        100.0
    } else {
        done as f32 / total as f32 * 100.0
    };
    emit_convert_progress(ConvertProgress::Chunks {
        done,
        total,
        percent,
    });
}
