//! Property Tests.
//!
//! Random request sequences against a small last-level cache that evicts constantly. After
//! every request the hierarchy must go idle, and every line must have at most one writer
//! (and no readers while it has one). The cache's MSHR never runs two events for one line
//! at once and drains completely whenever the system is idle.

use memhier_core::System;
use memhier_core::protocol::{Command, State};
use proptest::prelude::*;

use crate::common::harness::build_system;

/// Two requesters over a 2-set, 2-way last-level cache.
const TINY_L2: &str = r#"{
    "caches": [
        { "name": "l2",
          "params": { "lines": 4, "associativity": 2, "last_level": true },
          "down": [ { "target": "mem" } ] }
    ],
    "memories": [ { "name": "mem", "params": { "size": 65536, "latency": 3 } } ],
    "requesters": [
        { "name": "cpu0", "cache": "l2" },
        { "name": "cpu1", "cache": "l2" }
    ]
}"#;

const REQUESTERS: [&str; 2] = ["cpu0", "cpu1"];

/// Six lines; three map to each set.
const LINES: u64 = 6;

#[derive(Clone, Copy, Debug)]
enum Op {
    Read,
    Write(u8),
    Evict,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Read), any::<u8>().prop_map(Op::Write), Just(Op::Evict)]
}

fn step() -> impl Strategy<Value = (usize, u64, Op)> {
    (0..REQUESTERS.len(), 0..LINES, op())
}

fn apply(system: &mut System, requester: &str, addr: u64, op: Op) -> Result<(), TestCaseError> {
    let r = system
        .simulator
        .requester_mut(requester)
        .ok_or_else(|| TestCaseError::fail("requester missing"))?;
    match op {
        Op::Read => {
            let _ = r.issue(Command::GetS, addr);
        }
        Op::Write(value) => {
            if !r.write(addr, value) {
                let _ = r.issue(Command::GetX, addr);
            }
        }
        Op::Evict => {
            let _ = r.evict(addr);
        }
    }
    system
        .run()
        .map(|_| ())
        .map_err(|e| TestCaseError::fail(e.to_string()))
}

/// Checks the last-level cache's MSHR after a step has run to completion.
fn check_mshr(system: &System) -> Result<(), TestCaseError> {
    let mshr = system
        .simulator
        .cache("l2")
        .ok_or_else(|| TestCaseError::fail("cache missing"))?
        .engine()
        .mshr();
    for line in 0..LINES {
        let addr = line * 64;
        prop_assert!(mshr.in_progress_count(addr) <= 1, "line {addr:#x} has overlapping events");
    }
    if system.simulator.is_idle() {
        prop_assert!(mshr.is_empty(), "idle system left {} MSHR entries", mshr.size());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// No line ever has a writer alongside any other copy.
    #[test]
    fn single_writer(steps in prop::collection::vec(step(), 1..40)) {
        let mut system = build_system(TINY_L2);
        for (who, line, op) in steps {
            let addr = line * 64;
            apply(&mut system, REQUESTERS[who], addr, op)?;
            check_mshr(&system)?;

            for line in 0..LINES {
                let addr = line * 64;
                let states: Vec<State> = REQUESTERS
                    .iter()
                    .filter_map(|name| system.simulator.requester(name))
                    .map(|r| r.line_state(addr))
                    .collect();
                let writers = states.iter().filter(|s| matches!(s, State::E | State::M)).count();
                let holders = states.iter().filter(|s| **s != State::I).count();
                prop_assert!(writers <= 1, "line {addr:#x}: {states:?}");
                prop_assert!(writers == 0 || holders == 1, "line {addr:#x}: {states:?}");
            }
        }
        prop_assert!(system.simulator.is_idle());
    }

    /// Every completed read observes the last value written to its line.
    #[test]
    fn reads_see_last_write(steps in prop::collection::vec(step(), 1..40)) {
        let mut system = build_system(TINY_L2);
        let mut last = [0u8; LINES as usize];
        for (who, line, op) in steps {
            let addr = line * 64;
            apply(&mut system, REQUESTERS[who], addr, op)?;
            if let Op::Write(value) = op {
                // A write that had to fetch ownership first is applied once the grant arrives.
                let r = system
                    .simulator
                    .requester_mut(REQUESTERS[who])
                    .ok_or_else(|| TestCaseError::fail("requester missing"))?;
                if r.line_state(addr) == State::E || r.line_state(addr) == State::M {
                    prop_assert!(r.write(addr, value));
                    last[line as usize] = value;
                }
            }
            let data = system
                .simulator
                .requester(REQUESTERS[who])
                .and_then(|r| r.line_data(addr));
            if let Some(data) = data {
                prop_assert_eq!(data[0], last[line as usize], "line {:#x}", addr);
            }
        }
    }
}
