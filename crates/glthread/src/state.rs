//! Per-worker shared state and the decision logic of one render-thread pass.
//!
//! Everything in [`RenderWorkerState`] lives in the monitor's registry and is
//! only touched with the monitor held. [`transition`] is evaluated by the
//! render thread each time it wakes: it updates the shared flags, tells the
//! worker which backend resources to drop or acquire while the lock is still
//! held, and says what to do once the lock is released.

use std::collections::VecDeque;
use std::fmt;

use tracing::debug;

use crate::types::RenderMode;

/// Work queued onto the render thread.
pub type Event = Box<dyn FnOnce() + Send + 'static>;

/// Backend resources currently owned by the render thread. A surface is never
/// held without a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Held {
    #[default]
    Nothing,
    Context,
    ContextAndSurface,
}

impl Held {
    pub fn context(self) -> bool {
        self != Held::Nothing
    }

    pub fn surface(self) -> bool {
        self == Held::ContextAndSurface
    }
}

pub struct RenderWorkerState {
    pub(crate) should_exit: bool,
    pub(crate) exited: bool,
    pub(crate) paused: bool,
    pub(crate) requested_paused: bool,
    pub(crate) has_surface: bool,
    pub(crate) waiting_for_surface: bool,
    pub(crate) surface_is_bad: bool,
    pub(crate) finished_creating_surface: bool,
    pub(crate) held: Held,
    pub(crate) should_release_context: bool,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) size_changed: bool,
    pub(crate) render_mode: RenderMode,
    pub(crate) request_render: bool,
    pub(crate) want_render_notification: bool,
    pub(crate) render_complete: bool,
    pub(crate) event_queue: VecDeque<Event>,
    pub(crate) finish_drawing: Option<Event>,
    pub(crate) renderer_detached: bool,
    pub(crate) preserve_context_on_pause: bool,
}

impl RenderWorkerState {
    pub fn new(render_mode: RenderMode, preserve_context_on_pause: bool) -> Self {
        Self {
            should_exit: false,
            exited: false,
            paused: false,
            requested_paused: false,
            has_surface: false,
            waiting_for_surface: false,
            surface_is_bad: false,
            finished_creating_surface: false,
            held: Held::Nothing,
            should_release_context: false,
            width: 0,
            height: 0,
            size_changed: true,
            render_mode,
            request_render: true,
            want_render_notification: false,
            render_complete: false,
            event_queue: VecDeque::new(),
            finish_drawing: None,
            renderer_detached: false,
            preserve_context_on_pause,
        }
    }

    pub(crate) fn ready_to_draw(&self) -> bool {
        !self.paused
            && self.has_surface
            && !self.surface_is_bad
            && self.width > 0
            && self.height > 0
            && (self.request_render || self.render_mode == RenderMode::Continuously)
    }

    pub(crate) fn able_to_draw(&self) -> bool {
        self.held.surface() && self.ready_to_draw()
    }

    fn stop_surface(&mut self, actions: &mut Vec<LockedAction>) {
        if self.held.surface() {
            self.held = Held::Context;
            actions.push(LockedAction::ReleaseSurface);
        }
    }

    fn stop_context(&mut self, actions: &mut Vec<LockedAction>) {
        self.stop_surface(actions);
        if self.held.context() {
            self.held = Held::Nothing;
            actions.push(LockedAction::ReleaseContext);
        }
    }
}

impl fmt::Debug for RenderWorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderWorkerState")
            .field("should_exit", &self.should_exit)
            .field("exited", &self.exited)
            .field("paused", &self.paused)
            .field("requested_paused", &self.requested_paused)
            .field("has_surface", &self.has_surface)
            .field("waiting_for_surface", &self.waiting_for_surface)
            .field("surface_is_bad", &self.surface_is_bad)
            .field("finished_creating_surface", &self.finished_creating_surface)
            .field("held", &self.held)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("render_mode", &self.render_mode)
            .field("request_render", &self.request_render)
            .field("render_complete", &self.render_complete)
            .field("queued_events", &self.event_queue.len())
            .field("finish_drawing", &self.finish_drawing.is_some())
            .finish_non_exhaustive()
    }
}

/// Flags the render thread carries from one pass to the next. They are
/// private to the render thread and never read by the facade.
#[derive(Default)]
pub(crate) struct PassLocals {
    pub(crate) create_context: bool,
    pub(crate) create_surface: bool,
    pub(crate) lost_context: bool,
    pub(crate) size_changed: bool,
    pub(crate) want_render_notification: bool,
    pub(crate) do_render_notification: bool,
    pub(crate) asked_to_release_context: bool,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) finish_drawing: Option<Event>,
    pub(crate) renderer_detached: bool,
}

/// Backend work performed before the monitor is released, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockedAction {
    AcquireContext,
    ReleaseSurface,
    ReleaseContext,
}

pub(crate) enum Outcome {
    Exit,
    RunEvent(Event),
    /// Not ready to draw but a finish-drawing callback is waiting; report it
    /// now rather than after a frame that may never come.
    FinishEarly(Event),
    Draw,
    Wait,
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::Exit => "Exit",
            Outcome::RunEvent(_) => "RunEvent",
            Outcome::FinishEarly(_) => "FinishEarly",
            Outcome::Draw => "Draw",
            Outcome::Wait => "Wait",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub(crate) struct Transition {
    pub(crate) actions: Vec<LockedAction>,
    pub(crate) notify: bool,
    pub(crate) outcome: Outcome,
}

impl Transition {
    fn new(actions: Vec<LockedAction>, notify: bool, outcome: Outcome) -> Self {
        Self {
            actions,
            notify,
            outcome,
        }
    }
}

/// Evaluates one pass of the render loop against the shared state.
pub(crate) fn transition(state: &mut RenderWorkerState, pass: &mut PassLocals) -> Transition {
    let mut actions = Vec::new();
    let mut notify = false;

    // Read before the exit check: a dropped view sets both at once.
    pass.renderer_detached = state.renderer_detached;
    if state.should_exit {
        return Transition::new(actions, notify, Outcome::Exit);
    }

    if let Some(event) = state.event_queue.pop_front() {
        return Transition::new(actions, notify, Outcome::RunEvent(event));
    }

    let mut pausing = false;
    if state.paused != state.requested_paused {
        pausing = state.requested_paused;
        state.paused = state.requested_paused;
        notify = true;
        debug!(paused = state.paused, "pause state changed");
    }

    if state.should_release_context {
        debug!("releasing context because asked to");
        state.stop_context(&mut actions);
        state.should_release_context = false;
        pass.asked_to_release_context = true;
    }

    if pass.lost_context {
        state.stop_context(&mut actions);
        pass.lost_context = false;
    }

    if pausing && state.held.surface() {
        debug!("releasing surface because paused");
        state.stop_surface(&mut actions);
    }
    if pausing && state.held.context() && !state.preserve_context_on_pause {
        debug!("releasing context because paused");
        state.stop_context(&mut actions);
    }

    if !state.has_surface && !state.waiting_for_surface {
        debug!("noticed drawable lost");
        state.stop_surface(&mut actions);
        state.waiting_for_surface = true;
        state.surface_is_bad = false;
        notify = true;
    }

    if state.has_surface && state.waiting_for_surface {
        debug!("noticed drawable acquired");
        state.waiting_for_surface = false;
        notify = true;
    }

    if pass.do_render_notification {
        state.want_render_notification = false;
        pass.do_render_notification = false;
        state.render_complete = true;
        notify = true;
    }

    if let Some(callback) = state.finish_drawing.take() {
        pass.finish_drawing = Some(callback);
    }

    if state.ready_to_draw() {
        if !state.held.context() {
            if pass.asked_to_release_context {
                pass.asked_to_release_context = false;
            } else {
                actions.push(LockedAction::AcquireContext);
                state.held = Held::Context;
                pass.create_context = true;
                notify = true;
            }
        }

        if state.held == Held::Context {
            state.held = Held::ContextAndSurface;
            pass.create_surface = true;
            pass.size_changed = true;
        }

        if state.held.surface() {
            if state.size_changed {
                pass.size_changed = true;
                pass.width = state.width;
                pass.height = state.height;
                state.want_render_notification = true;
                pass.create_surface = true;
                state.size_changed = false;
            }
            state.request_render = false;
            notify = true;
            if state.want_render_notification {
                pass.want_render_notification = true;
            }
            return Transition::new(actions, notify, Outcome::Draw);
        }
    } else if let Some(callback) = pass.finish_drawing.take() {
        return Transition::new(actions, notify, Outcome::FinishEarly(callback));
    }

    Transition::new(actions, notify, Outcome::Wait)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drawable_state(mode: RenderMode) -> RenderWorkerState {
        let mut state = RenderWorkerState::new(mode, false);
        state.has_surface = true;
        state.width = 320;
        state.height = 240;
        state
    }

    /// Runs passes until the worker would draw, as if every drawn frame
    /// succeeded, and returns the locals of the drawing pass.
    fn draw_once(state: &mut RenderWorkerState) -> (PassLocals, Vec<LockedAction>) {
        let mut pass = PassLocals::default();
        let t = transition(state, &mut pass);
        assert!(matches!(t.outcome, Outcome::Draw), "{:?}", t.outcome);
        (pass, t.actions)
    }

    #[test]
    fn exit_wins_over_everything() {
        let mut state = drawable_state(RenderMode::Continuously);
        state.event_queue.push_back(Box::new(|| {}));
        state.should_exit = true;
        let t = transition(&mut state, &mut PassLocals::default());
        assert!(matches!(t.outcome, Outcome::Exit));
        assert_eq!(state.event_queue.len(), 1);
    }

    #[test]
    fn events_run_before_drawing_decisions() {
        let mut state = drawable_state(RenderMode::Continuously);
        state.event_queue.push_back(Box::new(|| {}));
        let t = transition(&mut state, &mut PassLocals::default());
        assert!(matches!(t.outcome, Outcome::RunEvent(_)));
        assert!(t.actions.is_empty());
        assert_eq!(state.held, Held::Nothing);
    }

    #[test]
    fn first_draw_acquires_everything_and_arms_notification() {
        let mut state = drawable_state(RenderMode::WhenDirty);
        let mut pass = PassLocals::default();

        // The drawable arrives: the worker first leaves its initial state.
        let t = transition(&mut state, &mut pass);
        assert_eq!(t.actions, vec![LockedAction::AcquireContext]);
        assert!(matches!(t.outcome, Outcome::Draw));
        assert!(pass.create_context);
        assert!(pass.create_surface);
        assert!(pass.size_changed);
        assert_eq!((pass.width, pass.height), (320, 240));
        assert!(pass.want_render_notification);
        assert_eq!(state.held, Held::ContextAndSurface);
        assert!(!state.request_render);
        assert!(!state.size_changed);
    }

    #[test]
    fn when_dirty_waits_until_requested() {
        let mut state = drawable_state(RenderMode::WhenDirty);
        let (mut pass, _) = draw_once(&mut state);
        pass.create_context = false;
        pass.create_surface = false;
        pass.size_changed = false;

        let t = transition(&mut state, &mut pass);
        assert!(matches!(t.outcome, Outcome::Wait));

        state.request_render = true;
        let t = transition(&mut state, &mut pass);
        assert!(matches!(t.outcome, Outcome::Draw));
        assert!(t.actions.is_empty());
        assert!(!pass.create_surface);
    }

    #[test]
    fn continuous_mode_keeps_drawing() {
        let mut state = drawable_state(RenderMode::Continuously);
        let (mut pass, _) = draw_once(&mut state);
        for _ in 0..3 {
            let t = transition(&mut state, &mut pass);
            assert!(matches!(t.outcome, Outcome::Draw));
        }
    }

    #[test]
    fn render_notification_completes_on_next_pass() {
        let mut state = drawable_state(RenderMode::WhenDirty);
        let (mut pass, _) = draw_once(&mut state);
        // The frame was presented.
        pass.do_render_notification = true;
        pass.want_render_notification = false;

        let t = transition(&mut state, &mut pass);
        assert!(t.notify);
        assert!(state.render_complete);
        assert!(!state.want_render_notification);
        assert!(matches!(t.outcome, Outcome::Wait));
    }

    #[test]
    fn pausing_releases_surface_and_context() {
        let mut state = drawable_state(RenderMode::Continuously);
        let (mut pass, _) = draw_once(&mut state);
        state.requested_paused = true;

        let t = transition(&mut state, &mut pass);
        assert!(state.paused);
        assert!(t.notify);
        assert_eq!(
            t.actions,
            vec![LockedAction::ReleaseSurface, LockedAction::ReleaseContext]
        );
        assert_eq!(state.held, Held::Nothing);
        assert!(matches!(t.outcome, Outcome::Wait));
    }

    #[test]
    fn pausing_can_preserve_the_context() {
        let mut state = drawable_state(RenderMode::Continuously);
        state.preserve_context_on_pause = true;
        let (mut pass, _) = draw_once(&mut state);
        state.requested_paused = true;

        let t = transition(&mut state, &mut pass);
        assert_eq!(t.actions, vec![LockedAction::ReleaseSurface]);
        assert_eq!(state.held, Held::Context);

        // Resuming recreates only the surface.
        state.requested_paused = false;
        state.request_render = true;
        let mut pass = PassLocals::default();
        let t = transition(&mut state, &mut pass);
        assert!(t.actions.is_empty());
        assert!(matches!(t.outcome, Outcome::Draw));
        assert!(pass.create_surface);
        assert!(!pass.create_context);
    }

    #[test]
    fn losing_the_drawable_releases_the_surface_once() {
        let mut state = drawable_state(RenderMode::Continuously);
        let (mut pass, _) = draw_once(&mut state);
        state.has_surface = false;
        state.surface_is_bad = true;

        let t = transition(&mut state, &mut pass);
        assert_eq!(t.actions, vec![LockedAction::ReleaseSurface]);
        assert!(state.waiting_for_surface);
        assert!(!state.surface_is_bad);
        assert_eq!(state.held, Held::Context);
        assert!(matches!(t.outcome, Outcome::Wait));

        let t = transition(&mut state, &mut pass);
        assert!(t.actions.is_empty());
        assert!(!t.notify);

        state.has_surface = true;
        let t = transition(&mut state, &mut pass);
        assert!(!state.waiting_for_surface);
        assert!(matches!(t.outcome, Outcome::Draw));
    }

    #[test]
    fn granted_release_skips_one_reacquire() {
        let mut state = drawable_state(RenderMode::Continuously);
        let (mut pass, _) = draw_once(&mut state);
        state.should_release_context = true;

        let t = transition(&mut state, &mut pass);
        assert_eq!(
            t.actions,
            vec![LockedAction::ReleaseSurface, LockedAction::ReleaseContext]
        );
        assert!(!state.should_release_context);
        assert!(matches!(t.outcome, Outcome::Wait));

        let t = transition(&mut state, &mut pass);
        assert_eq!(t.actions, vec![LockedAction::AcquireContext]);
        assert!(matches!(t.outcome, Outcome::Draw));
    }

    #[test]
    fn lost_context_is_torn_down_and_reacquired() {
        let mut state = drawable_state(RenderMode::Continuously);
        let (mut pass, _) = draw_once(&mut state);
        pass.create_context = false;
        pass.lost_context = true;

        let t = transition(&mut state, &mut pass);
        assert_eq!(
            t.actions,
            vec![
                LockedAction::ReleaseSurface,
                LockedAction::ReleaseContext,
                LockedAction::AcquireContext,
            ]
        );
        assert!(pass.create_context);
        assert!(!pass.lost_context);
        assert!(matches!(t.outcome, Outcome::Draw));
    }

    #[test]
    fn finish_callback_is_reported_early_when_not_ready() {
        let mut state = RenderWorkerState::new(RenderMode::WhenDirty, false);
        state.finish_drawing = Some(Box::new(|| {}));
        let mut pass = PassLocals::default();

        let t = transition(&mut state, &mut pass);
        assert!(matches!(t.outcome, Outcome::FinishEarly(_)));
        assert!(pass.finish_drawing.is_none());
        assert!(state.finish_drawing.is_none());
    }

    #[test]
    fn finish_callback_rides_along_with_a_frame() {
        let mut state = drawable_state(RenderMode::WhenDirty);
        state.finish_drawing = Some(Box::new(|| {}));
        let (pass, _) = draw_once(&mut state);
        assert!(pass.finish_drawing.is_some());
    }

    #[test]
    fn resize_recreates_the_surface_with_new_geometry() {
        let mut state = drawable_state(RenderMode::WhenDirty);
        let (mut pass, _) = draw_once(&mut state);
        pass.create_surface = false;
        pass.size_changed = false;

        state.width = 640;
        state.height = 480;
        state.size_changed = true;
        state.request_render = true;
        let t = transition(&mut state, &mut pass);
        assert!(matches!(t.outcome, Outcome::Draw));
        assert!(pass.create_surface);
        assert!(pass.size_changed);
        assert_eq!((pass.width, pass.height), (640, 480));
    }

    #[test]
    fn zero_geometry_is_not_drawable() {
        let mut state = drawable_state(RenderMode::Continuously);
        state.width = 0;
        assert!(!state.ready_to_draw());
        let t = transition(&mut state, &mut PassLocals::default());
        assert!(matches!(t.outcome, Outcome::Wait));
        assert!(t.actions.is_empty());
    }

    #[test]
    fn detach_flag_is_carried_into_the_pass() {
        let mut state = drawable_state(RenderMode::Continuously);
        state.renderer_detached = true;
        let mut pass = PassLocals::default();
        transition(&mut state, &mut pass);
        assert!(pass.renderer_detached);
    }

    #[test]
    fn detach_flag_is_seen_on_the_exit_pass() {
        let mut state = drawable_state(RenderMode::Continuously);
        state.renderer_detached = true;
        state.should_exit = true;
        let mut pass = PassLocals::default();
        let step = transition(&mut state, &mut pass);
        assert!(matches!(step.outcome, Outcome::Exit));
        assert!(pass.renderer_detached);
    }
}
