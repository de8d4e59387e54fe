mod breaker;
mod bus;
mod fault;
mod line;
mod pq;
mod pv;
mod shunt;
mod slack;
mod synchronous;

pub use breaker::{Breaker, BreakerData};
pub use bus::{Bus, BusData};
pub use fault::{Fault, FaultData};
pub use line::{Line, LineData};
pub use pq::{Pq, PqData};
pub use pv::{Pv, PvData};
pub use shunt::{Shunt, ShuntData};
pub use slack::{Slack, SlackData};
pub use synchronous::{FluxPart, MachineCore, MachinePart, SwingPart, Syn2, Syn2Data};
