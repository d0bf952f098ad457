use concur_map::{Table, TableOptions};
use std::thread;

fn main() {
    tracing_subscriber::fmt::init();

    println!("concur-map - Basic Usage Example");
    println!("=================================");

    let prices: Table<f64> = Table::new();
    prices.set("apple", 1.50).unwrap();
    prices.set("banana", 0.75).unwrap();
    prices.set("orange", 2.00).unwrap();

    println!("\nLookups:");
    for fruit in ["apple", "banana", "kiwi"] {
        match prices.get(fruit) {
            Some(price) => println!("  {fruit}: ${price:.2}"),
            None => println!("  {fruit}: not found"),
        }
    }

    println!("\nMixed key kinds in the same table:");
    let counters: Table<i64> = Table::new();
    counters.set(1i64, 10).unwrap();
    counters.set("1", 20).unwrap();
    println!("  get(1i64)  = {:?}", counters.get(1i64));
    println!("  get(\"1\")   = {:?}", counters.get("1"));

    println!("\nConcurrent writers from multiple threads:");
    let shared: Table<i64> = Table::new();
    thread::scope(|scope| {
        for t in 0..4 {
            let shared = &shared;
            scope.spawn(move || {
                for i in 0..100 {
                    shared.set(t * 100 + i, i).unwrap();
                }
            });
        }
    });
    println!("  table now holds {} entries", shared.len());

    shared.check_consistency().expect("table is internally consistent");

    println!("\nGrowth (run with RUST_LOG=debug to see the grow log line):");
    let small: Table<i64> = Table::with_options(TableOptions { initial_capacity: 8 });
    for i in 0..16i64 {
        small.set(i, i).unwrap();
    }
    println!("  capacity after overload: {}", small.capacity());

    println!("\nDone.");
}
