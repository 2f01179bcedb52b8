//! Sample-and-hold: a rate-limited path re-sends the latest sample on a
//! fixed cadence, whatever the input timing looks like.
//!
//! Run with: `cargo run --example 03_rate_limited_path`

use millrace::nodes::LoopbackNode;
use millrace::prelude::*;
use std::thread::sleep;
use std::time::Duration;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("millrace=info")
        .init();

    println!("Rate-limited path (25 Hz hold)");
    println!("==============================\n");

    let src_kind = LoopbackNode::new(16).with_read_timeout(Duration::from_millis(10));
    let src_handle = src_kind.handle();
    let source = Node::new("input", Box::new(src_kind)).into_shared();

    let sink_kind = LoopbackNode::new(64);
    let sink_handle = sink_kind.handle();
    let sink = Node::new("sink", Box::new(sink_kind)).into_shared();

    source.lock().unwrap().start()?;
    sink.lock().unwrap().start()?;

    let mut path = Path::builder("held")
        .source(source.clone())
        .destination(sink.clone())
        .rate(25.0)
        .build()?;
    path.check()?;
    path.start()?;

    let pool = Pool::new(16, Sample::bytes_required(4), MemoryType::Heap)?;
    let inject = |seq: u64, value: f32| {
        let mut smp = Sample::alloc(&pool).expect("demo pool exhausted");
        smp.set_sequence(seq);
        if let Some(vals) = smp.values_mut() {
            vals[0] = Value::float(value);
        }
        smp.set_len(1);
        let _ = src_handle.inject(smp);
    };

    // Two irregular inputs; the timer fills the gaps with repeats.
    inject(1, 10.0);
    sleep(Duration::from_millis(400));
    inject(2, 20.0);
    sleep(Duration::from_millis(400));

    path.stop()?;

    let mut per_seq = [0u32; 3];
    while let Ok(Some(smp)) = sink_handle.extract(Duration::ZERO) {
        per_seq[smp.sequence() as usize] += 1;
    }
    println!("seq 1 delivered {} times", per_seq[1]);
    println!("seq 2 delivered {} times", per_seq[2]);
    println!("(each input was injected once)");

    source.lock().unwrap().stop()?;
    sink.lock().unwrap().stop()?;
    Ok(())
}
