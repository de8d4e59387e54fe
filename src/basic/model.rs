use std::{any::Any, collections::HashMap};

use num_complex::Complex64;

use super::{
    address::Addresses,
    config::{FdVariant, Settings},
    dae::Dae,
    sparse::TripletMatrix,
};
use crate::error::{AddressingError, SolveError, SolveResult};

/// What a model contributes, read once when plans are built.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Capabilities {
    pub pflow: bool,
    pub gcall: bool,
    pub fcall: bool,
    pub gycall: bool,
    pub fxcall: bool,
    pub jac0: bool,
    pub init0: bool,
    pub init1: bool,
    pub series: bool,
    pub shunt: bool,
    pub flows: bool,
    pub stagen: bool,
    pub dyngen: bool,
    pub times: bool,
}

/// Voltage control role of a static generator at its bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusRole {
    Slack,
    Pv,
}

/// Status change requested by an event on another model's element.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub model: &'static str,
    pub id: i64,
    pub online: bool,
}

/// Complex power at both ends of a series element, in p.u.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BranchFlow {
    pub id: i64,
    pub from: usize,
    pub to: usize,
    pub s_from: Complex64,
    pub s_to: Complex64,
}

impl BranchFlow {
    pub fn loss(&self) -> Complex64 {
        self.s_from + self.s_to
    }
}

/// Data available to models when they initialize from a power flow solution.
pub struct InitContext<'a> {
    pub settings: &'a Settings,
    /// Generation injected at each bus by the power flow solution.
    pub bus_generation: &'a [Complex64],
}

/// Internal bus index and bus variable addresses, shared with devices.
#[derive(Debug, Default, Clone)]
pub struct BusAddresses {
    lookup: HashMap<i64, usize>,
    pub n_bus: usize,
    a_base: usize,
    v_base: usize,
}

impl BusAddresses {
    pub fn new(ids: &[i64], addr: &Addresses) -> Self {
        Self {
            lookup: ids.iter().enumerate().map(|(i, &id)| (id, i)).collect(),
            n_bus: ids.len(),
            a_base: addr.y_range(0).start,
            v_base: addr.y_range(1).start,
        }
    }

    pub fn index(&self, id: i64) -> Option<usize> {
        self.lookup.get(&id).copied()
    }

    /// Internal index of an external bus id, or a topology error.
    pub fn resolve(&self, model: &str, id: i64) -> SolveResult<usize> {
        self.index(id).ok_or_else(|| SolveError::Topology {
            what: format!("{model} references unknown bus {id}"),
        })
    }

    #[inline]
    pub fn a(&self, bus: usize) -> usize {
        self.a_base + bus
    }

    #[inline]
    pub fn v(&self, bus: usize) -> usize {
        self.v_base + bus
    }
}

/// A device type contributing equations to the global DAE.
///
/// Every equation hook is optional. The dispatcher only calls the hooks whose
/// capability flag is set, and never calls models without elements.
pub trait Model: Any {
    fn name(&self) -> &'static str;
    fn capabilities(&self) -> Capabilities;
    /// Addressing order key; anchor models sort first.
    fn priority(&self) -> u8 {
        100
    }
    fn count(&self) -> usize;
    fn states(&self) -> Vec<&'static str> {
        Vec::new()
    }
    fn algebs(&self) -> Vec<&'static str> {
        Vec::new()
    }
    fn element_names(&self) -> Vec<String>;
    fn assign(&mut self, addr: Addresses);
    fn addresses(&self) -> Option<&Addresses>;
    /// Switches an element by external id. Returns false if it is unknown.
    fn set_status(&mut self, id: i64, online: bool) -> bool;
    fn set_online(&mut self, element: usize, online: bool);
    /// Service status of every element, in element order.
    fn statuses(&self) -> Vec<bool>;

    /// Resolves bus references once addresses are known.
    fn link(&mut self, _buses: &BusAddresses) -> SolveResult<()> {
        Ok(())
    }
    /// Terminal bus of each element, for single-terminal devices.
    fn terminals(&self) -> Vec<usize> {
        Vec::new()
    }
    /// In-service branch terminal pairs, for series devices.
    fn branches(&self) -> Vec<(usize, usize)> {
        Vec::new()
    }
    fn bus_roles(&self) -> Vec<(usize, BusRole)> {
        Vec::new()
    }

    fn init0(&mut self, _dae: &mut Dae, _settings: &Settings) {}
    /// Drops modes and event state set up for a time domain run.
    fn restore_static(&mut self) {}
    fn init1(&mut self, _dae: &mut Dae, _ctx: &InitContext) -> SolveResult<()> {
        Ok(())
    }

    fn gcall(&mut self, _dae: &mut Dae) {}
    fn fcall(&mut self, _dae: &mut Dae) {}
    fn gycall(&mut self, _dae: &mut Dae) {}
    fn fxcall(&mut self, _dae: &mut Dae) {}
    fn jac0(&mut self, _dae: &mut Dae) {}

    /// Recovers branch flows from a converged solution.
    fn seriesflow(&mut self, _dae: &Dae) {}
    fn flows(&self) -> Vec<BranchFlow> {
        Vec::new()
    }
    /// Adds this model's share of the fast-decoupled B' and B''.
    fn build_b(&self, _variant: FdVariant, _bp: &mut TripletMatrix, _bpp: &mut TripletMatrix) {}
    /// Writes back generator outputs from the per-bus generation requirement.
    fn recover_injection(&mut self, _dae: &mut Dae, _generation: &[Complex64]) {}

    fn event_times(&self) -> Vec<f64> {
        Vec::new()
    }
    /// Brings event-driven state in line with time `t`.
    fn check_time(&mut self, _t: f64) -> Vec<StatusChange> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A concrete model that can be populated from case data.
pub trait Device: Model + Default {
    type Data;
    const NAME: &'static str;
    fn insert(&mut self, id: i64, data: Self::Data) -> Result<usize, AddressingError>;
    fn delete(&mut self, id: i64) -> Option<Self::Data>;
}

/// Element roster: external ids, names, status flags and parameters.
#[derive(Debug, Clone)]
pub struct Elements<P> {
    ids: Vec<i64>,
    names: Vec<String>,
    online: Vec<bool>,
    data: Vec<P>,
}

impl<P> Default for Elements<P> {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            names: Vec::new(),
            online: Vec::new(),
            data: Vec::new(),
        }
    }
}

impl<P> Elements<P> {
    pub fn insert(&mut self, model: &str, id: i64, data: P) -> Result<usize, AddressingError> {
        if self.ids.contains(&id) {
            return Err(AddressingError::DuplicateElement {
                model: model.to_string(),
                id,
            });
        }
        self.ids.push(id);
        self.names.push(format!("{model}_{id}"));
        self.online.push(true);
        self.data.push(data);
        Ok(self.ids.len() - 1)
    }

    /// Removes an element; later elements shift down by one.
    pub fn remove(&mut self, id: i64) -> Option<P> {
        let i = self.index_of(id)?;
        self.ids.remove(i);
        self.names.remove(i);
        self.online.remove(i);
        Some(self.data.remove(i))
    }

    pub fn index_of(&self, id: i64) -> Option<usize> {
        self.ids.iter().position(|&x| x == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, i: usize) -> i64 {
        self.ids[i]
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn rename(&mut self, id: i64, name: impl Into<String>) -> bool {
        match self.index_of(id) {
            Some(i) => {
                self.names[i] = name.into();
                true
            }
            None => false,
        }
    }

    pub fn is_online(&self, i: usize) -> bool {
        self.online[i]
    }

    /// Status as a 0/1 multiplier.
    #[inline]
    pub fn u(&self, i: usize) -> f64 {
        if self.online[i] { 1.0 } else { 0.0 }
    }

    pub fn statuses(&self) -> &[bool] {
        &self.online
    }

    pub fn set_online(&mut self, i: usize, online: bool) {
        self.online[i] = online;
    }

    pub fn data(&self, i: usize) -> &P {
        &self.data[i]
    }

    pub fn data_mut(&mut self, i: usize) -> &mut P {
        &mut self.data[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &P)> {
        self.data.iter().enumerate()
    }
}

/// Implements the bookkeeping half of [`Model`] for a device with
/// `elements: Elements<_>` and `addr: Option<Addresses>` fields.
macro_rules! device_common {
    () => {
        fn name(&self) -> &'static str {
            <Self as $crate::basic::model::Device>::NAME
        }
        fn count(&self) -> usize {
            self.elements.len()
        }
        fn element_names(&self) -> Vec<String> {
            self.elements.names().to_vec()
        }
        fn assign(&mut self, addr: $crate::basic::address::Addresses) {
            self.addr = Some(addr);
        }
        fn addresses(&self) -> Option<&$crate::basic::address::Addresses> {
            self.addr.as_ref()
        }
        fn set_status(&mut self, id: i64, online: bool) -> bool {
            match self.elements.index_of(id) {
                Some(i) => {
                    self.elements.set_online(i, online);
                    true
                }
                None => false,
            }
        }
        fn set_online(&mut self, element: usize, online: bool) {
            self.elements.set_online(element, online);
        }
        fn statuses(&self) -> Vec<bool> {
            self.elements.statuses().to_vec()
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    };
}

/// Implements [`Device`] on top of the `elements` roster.
macro_rules! impl_device {
    ($ty:ty, $data:ty, $name:literal) => {
        impl $crate::basic::model::Device for $ty {
            type Data = $data;
            const NAME: &'static str = $name;
            fn insert(
                &mut self,
                id: i64,
                data: Self::Data,
            ) -> Result<usize, $crate::error::AddressingError> {
                self.elements.insert($name, id, data)
            }
            fn delete(&mut self, id: i64) -> Option<Self::Data> {
                self.elements.remove(id)
            }
        }
    };
}

pub(crate) use device_common;
pub(crate) use impl_device;
