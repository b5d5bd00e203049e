#![forbid(unsafe_code)]

//! State-driven rendering on top of [`ObservableValue`].
//!
//! A screen that loads data is modelled as one exclusive [`LoadState`]
//! instead of separate `loading` / `data` / `error` fields, so it can never be
//! "loading and failed" at once. A [`RenderBinding`] connects such a state
//! (or any `PartialEq` value) to a [`Render`] implementation.
//!
//! # Invariants
//!
//! 1. A binding renders once as soon as it is created.
//! 2. A binding re-renders only when the delivered state differs from the
//!    last rendered one, so publishing an equal state twice is idempotent.
//! 3. Dropping the binding cancels its subscription.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::observable::ObservableValue;
use crate::token::{SubscriptionGuard, SubscriptionToken};

/// Exclusive state of an asynchronous load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState<D, E = String> {
    Loading,
    Loaded(D),
    Failed(E),
}

impl<D, E> Default for LoadState<D, E> {
    fn default() -> Self {
        Self::Loading
    }
}

impl<D, E> LoadState<D, E> {
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Loaded data, if any.
    #[must_use]
    pub fn data(&self) -> Option<&D> {
        match self {
            Self::Loaded(data) => Some(data),
            _ => None,
        }
    }

    /// Failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Transform the loaded data, keeping the other cases.
    pub fn map<U>(self, f: impl FnOnce(D) -> U) -> LoadState<U, E> {
        match self {
            Self::Loading => LoadState::Loading,
            Self::Loaded(data) => LoadState::Loaded(f(data)),
            Self::Failed(err) => LoadState::Failed(err),
        }
    }

    pub fn from_result(result: Result<D, E>) -> Self {
        match result {
            Ok(data) => Self::Loaded(data),
            Err(err) => Self::Failed(err),
        }
    }
}

impl<D, E> From<Result<D, E>> for LoadState<D, E> {
    fn from(result: Result<D, E>) -> Self {
        Self::from_result(result)
    }
}

impl<D: Clone + 'static, E: Clone + 'static> ObservableValue<LoadState<D, E>> {
    /// Publish [`LoadState::Loading`].
    pub fn begin_loading(&self) {
        self.update(LoadState::Loading);
    }

    /// Publish the outcome of a load.
    pub fn finish(&self, result: Result<D, E>) {
        self.update(LoadState::from_result(result));
    }

    /// Subscribe to loaded data only. Replays if data is already loaded.
    pub fn observe_loaded(&self, callback: impl Fn(&D) + 'static) -> SubscriptionToken {
        self.subscribe(move |state: &LoadState<D, E>| {
            if let LoadState::Loaded(data) = state {
                callback(data);
            }
        })
    }

    /// Subscribe to failures only. Replays if the load already failed.
    pub fn observe_failed(&self, callback: impl Fn(&E) + 'static) -> SubscriptionToken {
        self.subscribe(move |state: &LoadState<D, E>| {
            if let LoadState::Failed(err) = state {
                callback(err);
            }
        })
    }
}

/// Something that draws itself from a state value.
pub trait Render<S> {
    fn render(&mut self, state: &S);
}

impl<S, F: FnMut(&S)> Render<S> for F {
    fn render(&mut self, state: &S) {
        self(state);
    }
}

/// Subscription that keeps a renderer in sync with an observable state.
///
/// The renderer is shared (`Rc<RefCell<R>>`) so its owner can keep
/// inspecting it. The first render runs as the subscription's replay, so a
/// renderer may publish to its own source at any time: the new state is
/// queued and rendered right after the current render.
pub struct RenderBinding {
    guard: SubscriptionGuard<SubscriptionToken>,
    renders: Rc<Cell<usize>>,
}

impl RenderBinding {
    /// Render `source`'s current state now, and again whenever it changes.
    pub fn bind<S, R>(source: &ObservableValue<S>, renderer: Rc<RefCell<R>>) -> Self
    where
        S: Clone + PartialEq + 'static,
        R: Render<S> + 'static,
    {
        let renders = Rc::new(Cell::new(0usize));
        let last: RefCell<Option<S>> = RefCell::new(None);
        let counter = Rc::clone(&renders);

        let sync = move |state: &S| {
            if last.borrow().as_ref() == Some(state) {
                tracing::trace!("state unchanged, render skipped");
                return;
            }
            renderer.borrow_mut().render(state);
            *last.borrow_mut() = Some(state.clone());
            counter.set(counter.get() + 1);
        };

        let token = source.subscribe_replaying(sync);
        Self {
            guard: token.into_guard(),
            renders,
        }
    }

    /// How many times the renderer has actually run.
    #[must_use]
    pub fn rendered_count(&self) -> usize {
        self.renders.get()
    }

    /// Whether the binding still receives updates.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.guard.token().is_some_and(SubscriptionToken::is_active)
    }
}

impl fmt::Debug for RenderBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderBinding")
            .field("rendered_count", &self.renders.get())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Show {
        title: String,
    }

    #[derive(Default)]
    struct HistoryScreen {
        frames: Vec<String>,
    }

    impl Render<LoadState<Vec<Show>>> for HistoryScreen {
        fn render(&mut self, state: &LoadState<Vec<Show>>) {
            let frame = match state {
                LoadState::Loading => "spinner".to_string(),
                LoadState::Loaded(shows) => format!("{} shows", shows.len()),
                LoadState::Failed(err) => format!("error: {err}"),
            };
            self.frames.push(frame);
        }
    }

    fn show(title: &str) -> Show {
        Show {
            title: title.to_string(),
        }
    }

    #[test]
    fn load_state_accessors() {
        let loading: LoadState<i32> = LoadState::default();
        assert!(loading.is_loading());
        assert_eq!(loading.data(), None);

        let loaded: LoadState<i32> = Ok(3).into();
        assert!(loaded.is_loaded());
        assert_eq!(loaded.data(), Some(&3));
        assert_eq!(loaded.map(|n| n * 2), LoadState::Loaded(6));

        let failed: LoadState<i32> = LoadState::from_result(Err("offline".to_string()));
        assert!(failed.is_failed());
        assert_eq!(failed.error().map(String::as_str), Some("offline"));
        assert_eq!(failed.map(|n| n + 1), LoadState::Failed("offline".to_string()));
    }

    #[test]
    fn binding_renders_each_distinct_state() {
        let state = ObservableValue::new(LoadState::<Vec<Show>>::Loading);
        let screen = Rc::new(RefCell::new(HistoryScreen::default()));
        let binding = RenderBinding::bind(&state, Rc::clone(&screen));

        state.finish(Ok(vec![show("Dark"), show("Severance")]));
        state.begin_loading();
        state.finish(Err("timeout".to_string()));

        assert_eq!(
            screen.borrow().frames,
            vec!["spinner", "2 shows", "spinner", "error: timeout"]
        );
        assert_eq!(binding.rendered_count(), 4);
    }

    #[test]
    fn equal_state_is_not_rerendered() {
        let state = ObservableValue::new(LoadState::<Vec<Show>>::Loading);
        let screen = Rc::new(RefCell::new(HistoryScreen::default()));
        let binding = RenderBinding::bind(&state, Rc::clone(&screen));

        state.begin_loading();
        state.begin_loading();
        state.finish(Ok(vec![show("Dark")]));
        state.finish(Ok(vec![show("Dark")]));

        assert_eq!(screen.borrow().frames, vec!["spinner", "1 shows"]);
        assert_eq!(binding.rendered_count(), 2);
        assert_eq!(state.version(), 4);
    }

    #[test]
    fn dropping_binding_stops_rendering() {
        let state = ObservableValue::new(0);
        let frames = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&frames);
        let renderer = Rc::new(RefCell::new(move |v: &i32| sink.borrow_mut().push(*v)));

        let binding = RenderBinding::bind(&state, renderer);
        assert!(binding.is_active());
        state.update(1);
        drop(binding);
        state.update(2);

        assert_eq!(*frames.borrow(), vec![0, 1]);
        assert_eq!(state.subscriber_count(), 0);
    }

    #[test]
    fn binding_renders_initially_without_replay() {
        use crate::config::ObserveConfig;

        let state = ObservableValue::with_config(5, ObserveConfig::new().with_replay(false));
        let frames = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&frames);
        let binding = RenderBinding::bind(
            &state,
            Rc::new(RefCell::new(move |v: &i32| sink.borrow_mut().push(*v))),
        );
        assert_eq!(*frames.borrow(), vec![5]);
        assert_eq!(binding.rendered_count(), 1);
    }

    #[test]
    fn renderer_may_publish_during_first_render() {
        let state = ObservableValue::new(0);
        let frames = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&frames);
        let source = state.clone();
        let renderer = Rc::new(RefCell::new(move |v: &i32| {
            sink.borrow_mut().push(*v);
            if *v == 0 {
                source.update(1);
            }
        }));

        let binding = RenderBinding::bind(&state, renderer);
        assert_eq!(*frames.borrow(), vec![0, 1]);
        assert_eq!(binding.rendered_count(), 2);

        state.update(1);
        assert_eq!(*frames.borrow(), vec![0, 1]);
        state.update(2);
        assert_eq!(*frames.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn observe_loaded_and_failed_filter_cases() {
        let state: ObservableValue<LoadState<Show>> = ObservableValue::new(LoadState::Loading);
        let titles = Rc::new(RefCell::new(Vec::new()));
        let errors = Rc::new(RefCell::new(Vec::new()));

        let titles_cb = Rc::clone(&titles);
        let _loaded = state.observe_loaded(move |s| titles_cb.borrow_mut().push(s.title.clone()));
        let errors_cb = Rc::clone(&errors);
        let _failed = state.observe_failed(move |e| errors_cb.borrow_mut().push(e.clone()));

        state.finish(Ok(show("Dark")));
        state.begin_loading();
        state.finish(Err("404".to_string()));

        assert_eq!(*titles.borrow(), vec!["Dark".to_string()]);
        assert_eq!(*errors.borrow(), vec!["404".to_string()]);
    }
}
