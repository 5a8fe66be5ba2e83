//! Binding of the live rendering-surface handle to a drawing consumer.
//! 將作用中的繪圖表面控制代碼綁定到外部繪圖元件。

use tracing::trace;

use crate::error::{PrintError, PrintResult};
use crate::job::JobState;
use crate::spooler::SurfaceHandle;
use crate::units::{Anchor, DeviceMetrics, LogicalMapping, LogicalUnit};

/// External consumer that issues drawing calls against a native handle.
///
/// The session attaches it at the start of every page and detaches it before
/// the page ends; device state such as selected pens or fonts does not survive
/// a page boundary.
pub trait DrawingSurface {
    fn attach(&mut self, handle: SurfaceHandle, mapping: &LogicalMapping);
    fn detach(&mut self);
    /// Called when the logical unit changes while attached.
    fn mapping_changed(&mut self, mapping: &LogicalMapping);
}

/// Consumer used by sessions that only query geometry or spool blank pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoSurface;

impl DrawingSurface for NoSurface {
    fn attach(&mut self, _handle: SurfaceHandle, _mapping: &LogicalMapping) {}

    fn detach(&mut self) {}

    fn mapping_changed(&mut self, _mapping: &LogicalMapping) {}
}

/// State handed to the pre-draw check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawContext {
    pub state: JobState,
    pub page: u32,
    pub bound: bool,
}

/// Guard run before every drawing call.
pub type PreDrawCheck = Box<dyn Fn(&DrawContext) -> PrintResult<()> + Send>;

fn require_printing(context: &DrawContext) -> PrintResult<()> {
    if context.state == JobState::Printing {
        Ok(())
    } else {
        Err(PrintError::NotPrinting)
    }
}

pub struct SurfaceBinder<C> {
    consumer: C,
    bound: Option<SurfaceHandle>,
    unit: LogicalUnit,
    anchor: Anchor,
    mapping: Option<LogicalMapping>,
    units_per_inch: f64,
    check: PreDrawCheck,
}

impl<C: std::fmt::Debug> std::fmt::Debug for SurfaceBinder<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceBinder")
            .field("consumer", &self.consumer)
            .field("bound", &self.bound)
            .field("unit", &self.unit)
            .field("anchor", &self.anchor)
            .field("units_per_inch", &self.units_per_inch)
            .finish_non_exhaustive()
    }
}

impl<C: DrawingSurface> SurfaceBinder<C> {
    pub fn new(consumer: C, unit: LogicalUnit, anchor: Anchor) -> Self {
        Self {
            consumer,
            bound: None,
            unit,
            anchor,
            mapping: None,
            units_per_inch: 0.0,
            check: Box::new(require_printing),
        }
    }

    /// Read-only view of the consumer, e.g. to collect recorded output.
    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn set_pre_draw_check(&mut self, check: PreDrawCheck) {
        self.check = check;
    }

    pub fn reset_pre_draw_check(&mut self) {
        self.check = Box::new(require_printing);
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn handle(&self) -> Option<SurfaceHandle> {
        self.bound
    }

    pub fn unit(&self) -> LogicalUnit {
        self.unit
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    pub fn mapping(&self) -> Option<&LogicalMapping> {
        self.mapping.as_ref()
    }

    /// Vertical logical units per inch for the active unit.
    pub fn units_per_inch(&self) -> f64 {
        self.units_per_inch
    }

    /// Attaches the consumer to `handle`, deriving the mapping from `metrics`.
    pub fn bind(&mut self, handle: SurfaceHandle, metrics: &DeviceMetrics) -> PrintResult<()> {
        if self.bound.is_some() {
            return Err(PrintError::AlreadyBound);
        }
        let mapping = LogicalMapping::new(self.unit, self.anchor, metrics);
        self.units_per_inch = mapping.units_per_inch();
        self.bound = Some(handle);
        self.consumer.attach(handle, &mapping);
        self.mapping = Some(mapping);
        trace!(handle = handle.0, unit = ?self.unit, "surface bound");
        Ok(())
    }

    /// Detaches the consumer; the handle itself stays alive.
    pub fn unbind(&mut self) -> bool {
        let Some(handle) = self.bound.take() else {
            return false;
        };
        self.consumer.detach();
        self.mapping = None;
        trace!(handle = handle.0, "surface unbound");
        true
    }

    /// Changes the logical unit and origin anchor.
    ///
    /// `metrics` must be freshly read from the device so the extents match the
    /// current page.
    pub fn set_logical_unit(&mut self, unit: LogicalUnit, anchor: Anchor, metrics: &DeviceMetrics) {
        self.unit = unit;
        self.anchor = anchor;
        self.refresh(metrics);
    }

    /// Re-derives the cached scale after the device metrics may have changed.
    pub fn refresh(&mut self, metrics: &DeviceMetrics) {
        let mapping = LogicalMapping::new(self.unit, self.anchor, metrics);
        self.units_per_inch = mapping.units_per_inch();
        if self.bound.is_some() {
            self.consumer.mapping_changed(&mapping);
            self.mapping = Some(mapping);
        }
    }

    /// Runs `draw` against the bound consumer after the pre-draw check passes.
    pub fn draw<R>(
        &mut self,
        context: DrawContext,
        draw: impl FnOnce(&mut C, &LogicalMapping) -> R,
    ) -> PrintResult<R> {
        (self.check)(&context)?;
        let mapping = self.mapping.as_ref().ok_or(PrintError::NotBound)?;
        Ok(draw(&mut self.consumer, mapping))
    }

    pub fn into_consumer(self) -> C {
        self.consumer
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::units::{PixelOffset, PixelSize, Resolution};

    #[derive(Default)]
    struct Events(Vec<String>);

    struct Probe(Arc<Mutex<Events>>);

    impl DrawingSurface for Probe {
        fn attach(&mut self, handle: SurfaceHandle, mapping: &LogicalMapping) {
            self.0
                .lock()
                .unwrap()
                .0
                .push(format!("attach {} {:?}", handle.0, mapping.unit));
        }

        fn detach(&mut self) {
            self.0.lock().unwrap().0.push("detach".into());
        }

        fn mapping_changed(&mut self, mapping: &LogicalMapping) {
            self.0
                .lock()
                .unwrap()
                .0
                .push(format!("remap {:?}", mapping.unit));
        }
    }

    fn metrics() -> DeviceMetrics {
        DeviceMetrics {
            dpi: Resolution::uniform(300),
            physical: PixelSize {
                width: 2480,
                height: 3508,
            },
            offset: PixelOffset { x: 50, y: 50 },
            printable: PixelSize {
                width: 2380,
                height: 3408,
            },
        }
    }

    fn printing(bound: bool) -> DrawContext {
        DrawContext {
            state: JobState::Printing,
            page: 1,
            bound,
        }
    }

    #[test]
    fn double_bind_is_refused() {
        let mut binder = SurfaceBinder::new(NoSurface, LogicalUnit::DeviceNative, Anchor::PrintableArea);
        binder.bind(SurfaceHandle(1), &metrics()).unwrap();
        assert!(matches!(
            binder.bind(SurfaceHandle(1), &metrics()),
            Err(PrintError::AlreadyBound)
        ));
        assert!(binder.unbind());
        assert!(!binder.unbind());
    }

    #[test]
    fn consumer_sees_attach_remap_detach() {
        let events = Arc::new(Mutex::new(Events::default()));
        let mut binder = SurfaceBinder::new(
            Probe(Arc::clone(&events)),
            LogicalUnit::DeviceNative,
            Anchor::PrintableArea,
        );
        binder.bind(SurfaceHandle(9), &metrics()).unwrap();
        binder.set_logical_unit(LogicalUnit::TenthsMillimeter, Anchor::PhysicalPage, &metrics());
        binder.unbind();

        let guard = events.lock().unwrap();
        assert_eq!(
            guard.0,
            vec![
                "attach 9 DeviceNative".to_string(),
                "remap TenthsMillimeter".to_string(),
                "detach".to_string(),
            ]
        );
    }

    #[test]
    fn unit_change_rederives_units_per_inch() {
        let mut binder = SurfaceBinder::new(NoSurface, LogicalUnit::DeviceNative, Anchor::PrintableArea);
        binder.refresh(&metrics());
        assert_eq!(binder.units_per_inch(), 300.0);
        binder.set_logical_unit(LogicalUnit::HundredthsInch, Anchor::PrintableArea, &metrics());
        assert_eq!(binder.units_per_inch(), 100.0);
    }

    #[test]
    fn draw_requires_printing_and_binding() {
        let events = Arc::new(Mutex::new(Events::default()));
        let mut binder = SurfaceBinder::new(Probe(events), LogicalUnit::DeviceNative, Anchor::PrintableArea);

        let idle = DrawContext {
            state: JobState::Idle,
            page: 0,
            bound: false,
        };
        assert!(matches!(binder.draw(idle, |_, _| ()), Err(PrintError::NotPrinting)));
        assert!(matches!(
            binder.draw(printing(false), |_, _| ()),
            Err(PrintError::NotBound)
        ));

        binder.bind(SurfaceHandle(2), &metrics()).unwrap();
        let scale = binder
            .draw(printing(true), |_, mapping| mapping.scale_x)
            .unwrap();
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn custom_check_replaces_default_guard() {
        let mut binder = SurfaceBinder::new(NoSurface, LogicalUnit::DeviceNative, Anchor::PrintableArea);
        binder.set_pre_draw_check(Box::new(|context: &DrawContext| {
            if context.page > 1 {
                Err(PrintError::invalid_argument("page", "only the cover is drawable"))
            } else {
                Ok(())
            }
        }));
        binder.bind(SurfaceHandle(3), &metrics()).unwrap();
        assert!(binder.draw(printing(true), |_, _| ()).is_ok());
        let second = DrawContext {
            page: 2,
            ..printing(true)
        };
        assert!(binder.draw(second, |_, _| ()).is_err());
    }
}
