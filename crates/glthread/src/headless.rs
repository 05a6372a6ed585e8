//! A software [`Display`] for running views without a GPU.
//!
//! Every platform call is recorded in a shared [`DisplayJournal`] and
//! failures can be scripted through a [`FaultInjector`], which is what the
//! CLI and the integration tests drive the render thread with.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::display::{ConfigDescriptor, ConfigSpec, Display, ErrorCode, RenderableType};

/// One recorded platform call. Handles are identified by their numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCall {
    Initialize,
    Terminate,
    ChooseConfigs,
    CreateContext(u64),
    DestroyContext(u64),
    CreateSurface(u64),
    DestroySurface(u64),
    /// `(surface, context)` bound, or `None` for unbind.
    MakeCurrent(Option<(u64, u64)>),
    SwapBuffers(u64),
}

#[derive(Debug, Clone, Default)]
pub struct DisplayJournal(Arc<Mutex<Vec<DisplayCall>>>);

impl DisplayJournal {
    fn record(&self, call: DisplayCall) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<DisplayCall> {
        self.0.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&DisplayCall) -> bool) -> usize {
        self.0.lock().iter().filter(|call| predicate(call)).count()
    }

    /// Index of the first recorded call matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&DisplayCall) -> bool) -> Option<usize> {
        self.0.lock().iter().position(predicate)
    }

    pub fn frames_presented(&self) -> usize {
        self.count(|call| matches!(call, DisplayCall::SwapBuffers(_)))
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Debug, Default)]
struct Faults {
    swaps: VecDeque<ErrorCode>,
    surfaces: VecDeque<ErrorCode>,
    context_creation: Option<ErrorCode>,
    context_destroy: Option<ErrorCode>,
    client_errors: VecDeque<ErrorCode>,
}

/// Scripts failures into a [`HeadlessDisplay`]. Each fault fires once.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector(Arc<Mutex<Faults>>);

impl FaultInjector {
    /// Queues an error for an upcoming `swap_buffers`.
    pub fn fail_next_swap(&self, code: ErrorCode) {
        self.0.lock().swaps.push_back(code);
    }

    /// Queues an error for an upcoming window-surface creation.
    pub fn fail_next_surface(&self, code: ErrorCode) {
        self.0.lock().surfaces.push_back(code);
    }

    pub fn fail_context_creation(&self, code: ErrorCode) {
        self.0.lock().context_creation = Some(code);
    }

    pub fn fail_context_destroy(&self, code: ErrorCode) {
        self.0.lock().context_destroy = Some(code);
    }

    /// Queues an error reported by the next client error check.
    pub fn report_client_error(&self, code: ErrorCode) {
        self.0.lock().client_errors.push_back(code);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct HeadlessContext {
    id: u64,
}

impl HeadlessContext {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct HeadlessSurface {
    id: u64,
    window: HeadlessWindow,
}

impl HeadlessSurface {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn window(&self) -> &HeadlessWindow {
        &self.window
    }
}

/// A native window stand-in. Clones share validity, so the host can
/// invalidate a window the render thread is drawing into.
#[derive(Debug, Clone)]
pub struct HeadlessWindow {
    id: u64,
    valid: Arc<AtomicBool>,
}

impl HeadlessWindow {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }
}

impl PartialEq for HeadlessWindow {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HeadlessWindow {}

#[derive(Debug)]
pub struct HeadlessDisplay {
    configs: Vec<ConfigDescriptor>,
    initialized: bool,
    next_handle: u64,
    contexts: HashSet<u64>,
    surfaces: HashMap<u64, HeadlessWindow>,
    journal: DisplayJournal,
    faults: FaultInjector,
}

impl Default for HeadlessDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDisplay {
    /// A display offering RGB565, RGB888 with 16 and 24-bit depth, and
    /// RGBA8888 with depth and stencil.
    pub fn new() -> Self {
        let config = |id, [red, green, blue, alpha]: [u8; 4], depth, stencil| ConfigDescriptor {
            id,
            red,
            green,
            blue,
            alpha,
            depth,
            stencil,
            es2: true,
            es3: true,
        };
        Self::with_configs(vec![
            config(1, [5, 6, 5, 0], 0, 0),
            config(2, [8, 8, 8, 0], 16, 0),
            config(3, [8, 8, 8, 0], 24, 8),
            config(4, [8, 8, 8, 8], 24, 8),
        ])
    }

    pub fn with_configs(configs: Vec<ConfigDescriptor>) -> Self {
        Self {
            configs,
            initialized: false,
            next_handle: 0,
            contexts: HashSet::new(),
            surfaces: HashMap::new(),
            journal: DisplayJournal::default(),
            faults: FaultInjector::default(),
        }
    }

    pub fn journal(&self) -> DisplayJournal {
        self.journal.clone()
    }

    pub fn faults(&self) -> FaultInjector {
        self.faults.clone()
    }

    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    fn ensure_initialized(&self) -> Result<(), ErrorCode> {
        if self.initialized {
            Ok(())
        } else {
            Err(ErrorCode::NotInitialized)
        }
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl Display for HeadlessDisplay {
    type Context = HeadlessContext;
    type Surface = HeadlessSurface;
    type Drawable = HeadlessWindow;

    fn initialize(&mut self) -> Result<(u32, u32), ErrorCode> {
        self.journal.record(DisplayCall::Initialize);
        self.initialized = true;
        Ok((1, 5))
    }

    fn terminate(&mut self) {
        self.journal.record(DisplayCall::Terminate);
        self.initialized = false;
    }

    fn choose_configs(&self, spec: &ConfigSpec) -> Result<Vec<ConfigDescriptor>, ErrorCode> {
        self.journal.record(DisplayCall::ChooseConfigs);
        self.ensure_initialized()?;
        Ok(self
            .configs
            .iter()
            .filter(|config| config.satisfies(spec))
            .cloned()
            .collect())
    }

    fn create_context(
        &mut self,
        config: &ConfigDescriptor,
        client_version: u32,
    ) -> Result<Self::Context, ErrorCode> {
        self.ensure_initialized()?;
        if let Some(code) = self.faults.0.lock().context_creation.take() {
            return Err(code);
        }
        if let Some(kind) = RenderableType::for_client_version(client_version) {
            if !config.supports(kind) {
                return Err(ErrorCode::BadConfig);
            }
        }
        let id = self.next_handle();
        self.contexts.insert(id);
        self.journal.record(DisplayCall::CreateContext(id));
        Ok(HeadlessContext { id })
    }

    fn destroy_context(&mut self, context: Self::Context) -> Result<(), ErrorCode> {
        self.journal.record(DisplayCall::DestroyContext(context.id));
        if let Some(code) = self.faults.0.lock().context_destroy.take() {
            return Err(code);
        }
        if self.contexts.remove(&context.id) {
            Ok(())
        } else {
            Err(ErrorCode::BadContext)
        }
    }

    fn create_window_surface(
        &mut self,
        _config: &ConfigDescriptor,
        drawable: Self::Drawable,
    ) -> Result<Self::Surface, ErrorCode> {
        self.ensure_initialized()?;
        if let Some(code) = self.faults.0.lock().surfaces.pop_front() {
            return Err(code);
        }
        if !drawable.is_valid() {
            return Err(ErrorCode::BadNativeWindow);
        }
        let id = self.next_handle();
        self.surfaces.insert(id, drawable.clone());
        self.journal.record(DisplayCall::CreateSurface(id));
        Ok(HeadlessSurface {
            id,
            window: drawable,
        })
    }

    fn destroy_surface(&mut self, surface: Self::Surface) -> Result<(), ErrorCode> {
        self.journal.record(DisplayCall::DestroySurface(surface.id));
        match self.surfaces.remove(&surface.id) {
            Some(_) => Ok(()),
            None => Err(ErrorCode::BadSurface),
        }
    }

    fn make_current(
        &mut self,
        binding: Option<(&Self::Surface, &Self::Context)>,
    ) -> Result<(), ErrorCode> {
        self.journal.record(DisplayCall::MakeCurrent(
            binding.map(|(surface, context)| (surface.id, context.id)),
        ));
        let Some((surface, context)) = binding else {
            return Ok(());
        };
        if !self.contexts.contains(&context.id) {
            return Err(ErrorCode::BadContext);
        }
        if !self.surfaces.contains_key(&surface.id) {
            return Err(ErrorCode::BadSurface);
        }
        if !surface.window.is_valid() {
            return Err(ErrorCode::BadNativeWindow);
        }
        Ok(())
    }

    fn swap_buffers(&mut self, surface: &Self::Surface) -> Result<(), ErrorCode> {
        if let Some(code) = self.faults.0.lock().swaps.pop_front() {
            return Err(code);
        }
        if !surface.window.is_valid() {
            return Err(ErrorCode::BadSurface);
        }
        self.journal.record(DisplayCall::SwapBuffers(surface.id));
        Ok(())
    }

    fn check_error(&mut self) -> Option<ErrorCode> {
        self.faults.0.lock().client_errors.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ConfigSpec {
        ConfigSpec {
            red: 8,
            green: 8,
            blue: 8,
            alpha: 0,
            depth: 16,
            stencil: 0,
            renderable: Some(RenderableType::Es2),
        }
    }

    #[test]
    fn operations_require_initialize() {
        let mut display = HeadlessDisplay::new();
        assert_eq!(display.choose_configs(&spec()), Err(ErrorCode::NotInitialized));
        display.initialize().unwrap();
        let configs = display.choose_configs(&spec()).unwrap();
        assert_eq!(
            configs.iter().map(|config| config.id).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
    }

    #[test]
    fn invalidated_windows_refuse_surfaces_and_swaps() {
        let mut display = HeadlessDisplay::new();
        display.initialize().unwrap();
        let config = display.choose_configs(&spec()).unwrap().remove(0);
        let context = display.create_context(&config, 2).unwrap();

        let window = HeadlessWindow::new(1);
        let surface = display
            .create_window_surface(&config, window.clone())
            .unwrap();
        display.make_current(Some((&surface, &context))).unwrap();
        display.swap_buffers(&surface).unwrap();

        window.invalidate();
        assert_eq!(display.swap_buffers(&surface), Err(ErrorCode::BadSurface));
        assert_eq!(
            display.create_window_surface(&config, window).unwrap_err(),
            ErrorCode::BadNativeWindow
        );

        display.destroy_surface(surface).unwrap();
        display.destroy_context(context).unwrap();
        assert_eq!(display.live_surfaces(), 0);
        assert_eq!(display.live_contexts(), 0);
    }

    #[test]
    fn journal_is_shared_and_ordered() {
        let mut display = HeadlessDisplay::new();
        let journal = display.journal();
        display.initialize().unwrap();
        display.make_current(None).unwrap();
        display.terminate();
        assert_eq!(
            journal.calls(),
            vec![
                DisplayCall::Initialize,
                DisplayCall::MakeCurrent(None),
                DisplayCall::Terminate,
            ]
        );
        assert_eq!(journal.position(|call| *call == DisplayCall::Terminate), Some(2));
        journal.clear();
        assert!(journal.calls().is_empty());
    }

    #[test]
    fn faults_fire_once() {
        let mut display = HeadlessDisplay::new();
        let faults = display.faults();
        display.initialize().unwrap();
        let config = display.choose_configs(&spec()).unwrap().remove(0);

        faults.fail_context_creation(ErrorCode::BadAlloc);
        assert_eq!(display.create_context(&config, 2), Err(ErrorCode::BadAlloc));
        let context = display.create_context(&config, 2).unwrap();

        faults.report_client_error(ErrorCode::BadParameter);
        assert_eq!(display.check_error(), Some(ErrorCode::BadParameter));
        assert_eq!(display.check_error(), None);

        faults.fail_next_surface(ErrorCode::BadAlloc);
        assert_eq!(
            display
                .create_window_surface(&config, HeadlessWindow::new(3))
                .unwrap_err(),
            ErrorCode::BadAlloc
        );
        display.destroy_context(context).unwrap();
    }
}
