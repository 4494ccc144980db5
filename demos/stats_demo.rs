use clap::Parser;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use swiss_table::DefaultHashBuilder;
use swiss_table::HashMap;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Seed for the map's random source, for reproducible layouts.
    #[arg(short = 's', long = "seed", default_value_t = 0)]
    seed: u64,
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating HashMap with target capacity: {}",
        args.target_capacity
    );

    let mut map: HashMap<u64, u64, DefaultHashBuilder> = HashMap::with_capacity_hasher_and_rng(
        args.target_capacity,
        DefaultHashBuilder::default(),
        SmallRng::seed_from_u64(args.seed),
    );
    let limit = map.capacity();
    let slots = map.debug_stats().total_slots;
    println!("Actual capacity: {limit} ({slots} slots)");

    // Misses are drawn from a disjoint key range.
    let absent: Vec<u64> = (0..limit as u64).map(|k| k + (1 << 40)).collect();

    let mut inserted = 0u64;
    for (label, target) in [
        ("50%", slots / 2),
        ("75%", slots * 3 / 4),
        ("max", limit),
    ] {
        while (inserted as usize) < target.min(limit) {
            map.insert(inserted, inserted);
            inserted += 1;
        }

        println!();
        println!("--- load {label}: {} entries ---", map.len());
        let present: Vec<u64> = (0..inserted).collect();
        map.probe_stats(present.iter().chain(absent.iter())).print();
    }

    println!();
    map.debug_stats().print();

    let removed = (0..inserted).step_by(3).filter(|k| map.remove(k).is_some()).count();
    println!();
    println!("Removed {removed} entries; capacity left before rehash: {}", map.capacity());
    map.debug_stats().print();
}
