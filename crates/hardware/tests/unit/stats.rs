//! Statistics Unit Tests.
//!
//! Verifies registration, accumulation and sectioned reporting.

use memhier_core::stats::{STATS_SECTIONS, Statistics};
use pretty_assertions::assert_eq;

fn report(stats: &Statistics, sections: &[&str]) -> String {
    let sections: Vec<String> = sections.iter().map(|s| (*s).to_owned()).collect();
    let mut out = String::new();
    stats.write_sections("l1", &sections, &mut out).expect("write to string");
    out
}

/// Registering a name twice returns the same handle.
#[test]
fn register_is_idempotent() {
    let mut stats = Statistics::new();
    let a = stats.register("CacheHits");
    let b = stats.register("CacheHits");
    assert_eq!(a, b);
    assert_ne!(a, stats.register("CacheMisses"));
}

/// Counters and latency samples share the sum/sample representation.
#[test]
fn accumulation() {
    let mut stats = Statistics::new();
    stats.incr("CacheHits");
    stats.incr("CacheHits");
    stats.add("latency_GetS_hit", 4);
    stats.add("latency_GetS_hit", 8);

    assert_eq!(stats.get("CacheHits"), 2);
    assert_eq!(stats.samples("latency_GetS_hit"), 2);
    assert!((stats.mean("latency_GetS_hit") - 6.0).abs() < f64::EPSILON);
    assert_eq!(stats.get("never"), 0);
    assert!(stats.mean("never").abs() < f64::EPSILON);
}

/// Iteration is ordered by name.
#[test]
fn iteration_order() {
    let mut stats = Statistics::new();
    stats.incr("b");
    stats.add("a", 3);
    let names: Vec<(&str, u64, u64)> = stats.iter().collect();
    assert_eq!(names, vec![("a", 3, 1), ("b", 1, 1)]);
}

/// A full report prints every section with the miss rate.
#[test]
fn full_report() {
    let mut stats = Statistics::new();
    stats.incr("CacheHits");
    stats.incr("CacheMisses");
    stats.incr("GetSMiss_Arrival");
    stats.incr("eventSent_GetS");
    stats.incr("stateEvent_GetS_I");
    stats.incr("evict_M");
    stats.add("latency_GetS_miss", 10);
    stats.register("eventSent_PutM");

    let out = report(&stats, &[]);
    assert!(out.contains("CACHE l1"));
    assert!(out.contains("50.00%"));
    assert!(out.contains("GetSMiss"));
    assert!(out.contains("EVENTS SENT"));
    assert!(out.contains("  GetS "));
    assert!(!out.contains("PutM"));
    assert!(out.contains("GetS_I"));
    assert!(out.contains("PREFETCH"));
    assert!(out.contains("mean: 10.00"));
}

/// Section filters restrict the report.
#[test]
fn section_filter() {
    let mut stats = Statistics::new();
    stats.incr("evict_S");
    stats.incr("CacheHits");

    let out = report(&stats, &["evictions"]);
    assert!(out.contains("EVICTIONS"));
    assert!(!out.contains("HITS"));
    assert!(!out.contains("LATENCY"));
}

/// Every advertised section name produces its heading.
#[test]
fn every_section_has_heading() {
    let stats = Statistics::new();
    for section in STATS_SECTIONS {
        let out = report(&stats, &[*section]);
        let heading = match *section {
            "events" => "EVENTS SENT".to_owned(),
            "states" => "STATE/EVENT PAIRS".to_owned(),
            other => other.to_uppercase(),
        };
        assert!(out.contains(&heading), "{section}: {out}");
    }
}
