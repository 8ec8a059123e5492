//! Profiler statistics over scripted timelines.

use kernel_rt::profiling::{Attribute, ManualClock, Profiler};

/// Run one trial whose steps last `durations` ns, with `flops` per step.
fn record(profiler: &mut Profiler, clock: &ManualClock, durations: &[u64], flops: f64) {
    profiler.start_trial().unwrap();
    for (i, &d) in durations.iter().enumerate() {
        if i > 0 {
            profiler.next_step().unwrap();
        }
        profiler.set_step_name(format!("step{i}")).unwrap();
        profiler.set(Attribute::Flops, flops).unwrap();
        profiler.set(Attribute::Device, 1.0).unwrap();
        clock.advance(d);
    }
    profiler.stop_trial().unwrap();
}

#[test]
fn test_cold_run_excluded_from_mean_and_stddev() {
    let clock = ManualClock::new(1);
    let mut profiler = Profiler::with_clock("reduce", clock.clone());

    // T0 simulates compile + warm-up.
    record(&mut profiler, &clock, &[5_000_000, 9_000_000], 1e6);
    for d in [1_000, 1_200, 800, 1_000] {
        record(&mut profiler, &clock, &[d, 2 * d], 1e6);
    }
    profiler.end().unwrap();

    let average = profiler.average().unwrap();
    let step0 = average.step(0).unwrap();
    assert_eq!(step0.get(Attribute::Time), 1_000.0);
    assert_eq!(average.step(1).unwrap().get(Attribute::Time), 2_000.0);
    assert_eq!(average.get(Attribute::Time), 3_000.0);
    assert_eq!(average.get(Attribute::Device), 1.0);

    // {1000, 1200, 800, 1000}: Σ(x - mean)² = 80_000, n - 1 = 3.
    let expected = (80_000.0f64 / 3.0).sqrt();
    let sd = step0.attributes().std_dev(Attribute::Time).unwrap();
    assert!((sd - expected).abs() < 1e-9, "{sd} vs {expected}");

    // Identical flops everywhere: mean is exact and the spread is zero.
    assert_eq!(step0.get(Attribute::Flops), 1e6);
    assert_eq!(step0.attributes().std_dev(Attribute::Flops), Some(0.0));
}

#[test]
fn test_trial_time_matches_span() {
    let clock = ManualClock::new(500);
    let mut profiler = Profiler::with_clock("span", clock.clone());
    record(&mut profiler, &clock, &[10, 20, 30, 40], 0.0);

    let trial = profiler.trial(0).unwrap();
    assert_eq!(
        trial.get(Attribute::Time),
        trial.get(Attribute::StopTime) - trial.get(Attribute::StartTime)
    );
    assert_eq!(trial.get(Attribute::Time), 100.0);
    assert_eq!(trial.get(Attribute::FlopsPerSec), 0.0);
}

#[test]
fn test_summary_report_shape() {
    let clock = ManualClock::new(1);
    let mut profiler = Profiler::with_clock("scan<int>", clock.clone());
    for _ in 0..3 {
        record(&mut profiler, &clock, &[100, 100], 50.0);
    }
    profiler.end().unwrap();

    let mut out = Vec::new();
    profiler.write_sum(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.starts_with("<PROFILE name=\"scan&lt;int&gt;\" trials=\"3\" averaged=\"2\">"));
    assert_eq!(text.matches("<STEP ").count(), 2);
    assert!(text.contains("<ATTR name=\"Time[ns]\" value=\"200\" stddev=\"0\"/>"));
    assert!(text.contains("<ATTR name=\"Flops/s\" value=\"500000000\" stddev=\"0\"/>"));
    // Memory never recorded.
    assert!(!text.contains("MemoryAccesses"));
}
