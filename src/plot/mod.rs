//! Chart registry
//!
//! Figures created by scripts live in one process-wide registry, the way a
//! plotting library keeps its open figures. Access during an execution goes
//! through a [`RegistryLease`], which serializes executions on a gate and drains
//! the registry when dropped, whatever path the execution took.

pub mod capture;
pub mod png;
pub mod pyplot;
pub mod render;

pub use capture::{capture, Visualization};

use crate::script::error::{Fault, ScriptError, ScriptResult};
use lazy_static::lazy_static;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

lazy_static! {
    static ref GATE: Mutex<()> = Mutex::new(());
    static ref REGISTRY: Mutex<FigureRegistry> = Mutex::new(FigureRegistry::default());
}

const DEFAULT_SIZE: (f64, f64) = (6.4, 4.8);

#[derive(Debug, Clone, PartialEq)]
pub enum Artist {
    Bars {
        labels: Vec<String>,
        heights: Vec<f64>,
        horizontal: bool,
    },
    Line {
        xs: Vec<f64>,
        ys: Vec<f64>,
    },
    Scatter {
        xs: Vec<f64>,
        ys: Vec<f64>,
    },
    Histogram {
        values: Vec<f64>,
        bins: usize,
    },
    Pie {
        values: Vec<f64>,
        labels: Vec<String>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Axes {
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub artists: Vec<Artist>,
}

#[derive(Debug, Clone)]
pub struct Figure {
    pub id: usize,
    /// Size in inches
    pub size: (f64, f64),
    pub title: Option<String>,
    pub rows: usize,
    pub cols: usize,
    pub axes: Vec<Axes>,
    pub current_axes: usize,
}

impl Figure {
    /// Title reported with the capture: the figure title, else the first axes title
    pub fn display_title(&self) -> Option<String> {
        self.title
            .clone()
            .or_else(|| self.axes.iter().find_map(|a| a.title.clone()))
    }
}

#[derive(Debug)]
pub struct FigureRegistry {
    figures: Vec<Figure>,
    current: Option<usize>,
    next_id: usize,
    max_figures: usize,
}

impl Default for FigureRegistry {
    fn default() -> Self {
        Self {
            figures: Vec::new(),
            current: None,
            next_id: 1,
            max_figures: usize::MAX,
        }
    }
}

impl FigureRegistry {
    pub fn new_figure(&mut self, size: Option<(f64, f64)>, rows: usize, cols: usize) -> ScriptResult<usize> {
        if self.figures.len() >= self.max_figures {
            return Err(ScriptError::new(
                Fault::FigureLimit,
                format!("more than {} figures open", self.max_figures),
            ));
        }
        let (rows, cols) = (rows.max(1), cols.max(1));
        let id = self.next_id;
        self.next_id += 1;
        self.figures.push(Figure {
            id,
            size: size.unwrap_or(DEFAULT_SIZE),
            title: None,
            rows,
            cols,
            axes: vec![Axes::default(); rows * cols],
            current_axes: 0,
        });
        self.current = Some(id);
        Ok(id)
    }

    pub fn figure_mut(&mut self, id: usize) -> ScriptResult<&mut Figure> {
        self.figures
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| ScriptError::value(format!("figure {} is closed", id)))
    }

    pub fn axes_mut(&mut self, figure: usize, index: usize) -> ScriptResult<&mut Axes> {
        self.figure_mut(figure)?
            .axes
            .get_mut(index)
            .ok_or_else(|| ScriptError::index(format!("axes {} out of range", index)))
    }

    /// Current figure, created on first use
    pub fn current_figure(&mut self) -> ScriptResult<usize> {
        match self.current {
            Some(id) if self.figures.iter().any(|f| f.id == id) => Ok(id),
            _ => self.new_figure(None, 1, 1),
        }
    }

    pub fn current_axes(&mut self) -> ScriptResult<(usize, usize)> {
        let id = self.current_figure()?;
        let index = self.figure_mut(id)?.current_axes;
        Ok((id, index))
    }

    pub fn activate(&mut self, figure: usize, axes: usize) -> ScriptResult<()> {
        self.figure_mut(figure)?.current_axes = axes;
        self.current = Some(figure);
        Ok(())
    }

    /// Close one figure, or the current one
    pub fn close(&mut self, id: Option<usize>) {
        let target = id.or(self.current);
        self.figures.retain(|f| Some(f.id) != target);
        if self.current == target {
            self.current = self.figures.last().map(|f| f.id);
        }
    }

    /// `plt.close('all')`
    pub fn clear_figures(&mut self) {
        self.figures.clear();
        self.current = None;
    }

    pub fn clear(&mut self) {
        self.figures.clear();
        self.current = None;
        self.next_id = 1;
        self.max_figures = usize::MAX;
    }

    pub fn len(&self) -> usize {
        self.figures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }

    /// Open figures in creation order
    pub fn figures(&self) -> &[Figure] {
        &self.figures
    }

    fn set_limit(&mut self, max_figures: usize) {
        self.max_figures = max_figures;
    }
}

fn registry() -> MutexGuard<'static, FigureRegistry> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

/// Exclusive use of the chart registry for one execution
pub struct RegistryLease {
    _gate: MutexGuard<'static, ()>,
}

impl RegistryLease {
    pub fn acquire(max_figures: usize) -> Self {
        let gate = GATE.lock().unwrap_or_else(|e| e.into_inner());
        let mut reg = registry();
        reg.clear();
        reg.set_limit(max_figures);
        drop(reg);
        Self { _gate: gate }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FigureRegistry) -> R) -> R {
        f(&mut registry())
    }

    /// Serialize open figures until `deadline`, then clear the registry
    pub fn capture(&self, deadline: Instant) -> Vec<Visualization> {
        self.with(|registry| capture(registry, Some(deadline)))
    }
}

impl Drop for RegistryLease {
    fn drop(&mut self) {
        registry().clear();
    }
}

/// Figures left open in the process-wide registry once any running execution
/// has finished. Must not be called while holding a [`RegistryLease`].
pub fn open_figures() -> usize {
    let _gate = GATE.lock().unwrap_or_else(|e| e.into_inner());
    registry().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_figures_keep_creation_order() {
        let mut reg = FigureRegistry::default();
        let a = reg.new_figure(None, 1, 1).unwrap();
        let b = reg.new_figure(Some((3.0, 2.0)), 1, 2).unwrap();
        assert_eq!(reg.figures().iter().map(|f| f.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(reg.figures()[1].axes.len(), 2);
        reg.close(Some(a));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.current_figure().unwrap(), b);
    }

    #[test]
    fn test_figure_limit() {
        let mut reg = FigureRegistry::default();
        reg.set_limit(1);
        reg.new_figure(None, 1, 1).unwrap();
        let err = reg.new_figure(None, 1, 1).unwrap_err();
        assert_eq!(err.fault, Fault::FigureLimit);
    }

    #[test]
    fn test_lease_drains_on_drop() {
        {
            let lease = RegistryLease::acquire(4);
            lease.with(|reg| reg.new_figure(None, 1, 1)).unwrap();
            assert_eq!(lease.with(|reg| reg.len()), 1);
        }
        let lease = RegistryLease::acquire(4);
        assert!(lease.with(|reg| reg.is_empty()));
    }
}
