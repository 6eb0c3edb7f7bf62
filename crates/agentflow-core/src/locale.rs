//! Process-wide generation locale with scoped overrides.
//!
//! The locale tells generation clients which language to answer in. Runs
//! may override it for their duration through [`LocaleSettings::checkout`];
//! the returned guard withdraws that override when dropped, on every exit
//! path, whatever order concurrent runs finish in.

use std::sync::{Arc, RwLock, RwLockWriteGuard};

/// Base locale plus the overrides of runs still in flight. The newest live
/// override wins; released overrides leave the stack wherever they sit.
#[derive(Default)]
struct LocaleState {
    base: Option<String>,
    overrides: Vec<(u64, String)>,
    next_id: u64,
}

impl LocaleState {
    fn current(&self) -> Option<String> {
        self.overrides
            .last()
            .map(|(_, locale)| locale.clone())
            .or_else(|| self.base.clone())
    }
}

#[derive(Clone, Default)]
pub struct LocaleSettings {
    state: Arc<RwLock<LocaleState>>,
}

impl LocaleSettings {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            state: Arc::new(RwLock::new(LocaleState {
                base: initial,
                ..Default::default()
            })),
        }
    }

    /// The locale generations should currently use.
    pub fn current(&self) -> Option<String> {
        match self.state.read() {
            Ok(guard) => guard.current(),
            Err(poisoned) => poisoned.into_inner().current(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, LocaleState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Swap in `locale` until the guard is dropped.
    pub fn checkout(&self, locale: impl Into<String>) -> LocaleGuard {
        let locale = locale.into();
        let mut state = self.write();
        let id = state.next_id;
        state.next_id += 1;
        tracing::debug!("[Locale] Override {:?} -> {} (#{})", state.current(), locale, id);
        state.overrides.push((id, locale));
        LocaleGuard {
            settings: self.clone(),
            id,
        }
    }

    fn release(&self, id: u64) {
        let mut state = self.write();
        state.overrides.retain(|(other, _)| *other != id);
        tracing::debug!("[Locale] Release #{} -> {:?}", id, state.current());
    }
}

/// Withdraws its override on drop.
pub struct LocaleGuard {
    settings: LocaleSettings,
    id: u64,
}

impl Drop for LocaleGuard {
    fn drop(&mut self) {
        self.settings.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_restores_on_drop() {
        let settings = LocaleSettings::new(Some("en-US".to_string()));
        {
            let _guard = settings.checkout("fr-FR");
            assert_eq!(settings.current().as_deref(), Some("fr-FR"));
        }
        assert_eq!(settings.current().as_deref(), Some("en-US"));
    }

    #[test]
    fn test_nested_checkouts_unwind() {
        let settings = LocaleSettings::default();
        let outer = settings.checkout("de-DE");
        let inner = settings.checkout("ja-JP");
        assert_eq!(settings.current().as_deref(), Some("ja-JP"));
        drop(inner);
        assert_eq!(settings.current().as_deref(), Some("de-DE"));
        drop(outer);
        assert_eq!(settings.current(), None);
    }

    #[test]
    fn test_restores_when_unwinding() {
        let settings = LocaleSettings::new(Some("en-US".to_string()));
        let cloned = settings.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.checkout("es-ES");
            panic!("step failed");
        });
        assert!(result.is_err());
        assert_eq!(settings.current().as_deref(), Some("en-US"));
    }

    #[test]
    fn test_out_of_order_release_keeps_live_override() {
        let settings = LocaleSettings::new(Some("en-US".to_string()));
        let first = settings.checkout("fr-FR");
        let second = settings.checkout("de-DE");

        drop(first);
        assert_eq!(settings.current().as_deref(), Some("de-DE"));
        drop(second);
        assert_eq!(settings.current().as_deref(), Some("en-US"));
    }

    #[test]
    fn test_releasing_newest_falls_back_to_older_override() {
        let settings = LocaleSettings::new(Some("en-US".to_string()));
        let first = settings.checkout("fr-FR");
        let second = settings.checkout("de-DE");

        drop(second);
        assert_eq!(settings.current().as_deref(), Some("fr-FR"));
        drop(first);
        assert_eq!(settings.current().as_deref(), Some("en-US"));
    }
}
