//! Small cases shared by tests and demos.

use crate::basic::{
    config::Settings,
    elements::{
        Bus, BusData, Line, LineData, Pq, PqData, Pv, PvData, Slack, SlackData, Syn2, Syn2Data,
    },
    system::PowerSystem,
};
use crate::error::SolveResult;

fn line(bus1: i64, bus2: i64, r: f64, x: f64) -> LineData {
    LineData {
        bus1,
        bus2,
        r,
        x,
        ..Default::default()
    }
}

fn build(buses: &[i64], f: impl FnOnce(&mut PowerSystem) -> SolveResult<()>) -> PowerSystem {
    let mut ps = PowerSystem::new(Settings::default());
    let populate = |ps: &mut PowerSystem| -> SolveResult<()> {
        for &id in buses {
            ps.add::<Bus>(id, BusData::default())?;
        }
        f(ps)
    };
    if let Err(e) = populate(&mut ps) {
        panic!("invalid test case: {e}");
    }
    ps
}

/// Slack at bus 1 feeding a `p + jq` load at bus 2 through a lossless line
/// of reactance `x`.
pub fn two_bus(p: f64, q: f64, x: f64) -> PowerSystem {
    build(&[1, 2], |ps| {
        ps.add::<Slack>(1, SlackData { bus: 1, ..Default::default() })?;
        ps.add::<Line>(1, line(1, 2, 0.0, x))?;
        ps.add::<Pq>(1, PqData { bus: 2, p, q })?;
        Ok(())
    })
}

/// Meshed slack/PV/PQ case with resistive lines and line charging.
pub fn three_bus() -> PowerSystem {
    build(&[1, 2, 3], |ps| {
        ps.add::<Slack>(1, SlackData { bus: 1, v0: 1.02, ..Default::default() })?;
        ps.add::<Pv>(1, PvData { bus: 2, p0: 0.5, v0: 1.01 })?;
        ps.add::<Pq>(1, PqData { bus: 3, p: 0.9, q: 0.3 })?;
        ps.add::<Line>(1, LineData { b: 0.02, ..line(1, 2, 0.01, 0.1) })?;
        ps.add::<Line>(2, LineData { b: 0.02, ..line(1, 3, 0.02, 0.12) })?;
        ps.add::<Line>(3, LineData { b: 0.02, ..line(2, 3, 0.015, 0.1) })?;
        Ok(())
    })
}

/// Slack area 1-2, an unanchored island 3-4 with load, and an isolated bus 5.
pub fn islanded() -> PowerSystem {
    build(&[1, 2, 3, 4, 5], |ps| {
        ps.add::<Slack>(1, SlackData { bus: 1, ..Default::default() })?;
        ps.add::<Line>(1, line(1, 2, 0.01, 0.1))?;
        ps.add::<Line>(2, line(3, 4, 0.01, 0.1))?;
        ps.add::<Pq>(1, PqData { bus: 2, p: 0.4, q: 0.1 })?;
        ps.add::<Pq>(2, PqData { bus: 4, p: 0.3, q: 0.1 })?;
        ps.add::<Pq>(3, PqData { bus: 5, p: 0.2, q: 0.0 })?;
        Ok(())
    })
}

/// Single machine at bus 2 connected to an infinite bus through two
/// parallel lines (ids 10 and 11).
pub fn smib() -> PowerSystem {
    build(&[1, 2], |ps| {
        ps.add::<Slack>(1, SlackData { bus: 1, ..Default::default() })?;
        ps.add::<Pv>(1, PvData { bus: 2, p0: 0.8, v0: 1.0 })?;
        ps.add::<Line>(10, line(1, 2, 0.0, 0.5))?;
        ps.add::<Line>(11, line(1, 2, 0.0, 0.5))?;
        ps.add::<Syn2>(
            1,
            Syn2Data {
                bus: 2,
                ra: 0.0,
                xd1: 0.3,
                m: 8.0,
                d: 1.0,
                ..Default::default()
            },
        )?;
        Ok(())
    })
}
