//! Basic usage example for `SizeClassPool`.
//!
//! This example stores values of several types in one pool, shares one of them between two
//! handles and then compacts the pool after most values have been released.

use new_zealand::nz;
use size_class_pool::{SizeClassPool, size_classes_for};

fn print_pool_state(label: &str, pool: &SizeClassPool) {
    println!(
        "{label}: {} live values, {} slots, {} bytes",
        pool.len(),
        pool.total_block_count(),
        pool.total_byte_size()
    );

    for class in pool.size_classes() {
        println!(
            "    {:>3} byte slots (align {:>2}): {} live, {} free",
            class.size(),
            class.align(),
            class.live(),
            class.free()
        );
    }
}

fn main() {
    let pool = SizeClassPool::new(nz!(4), size_classes_for![u8, u32, (f64, f64), String]);
    print_pool_state("Created", &pool);

    let flag = pool.construct(1_u8).unwrap();
    let mut point = pool.construct((3.0_f64, 4.0_f64)).unwrap();
    let name = pool.construct_shared("pooled".to_string()).unwrap();
    let name_alias = name.clone();

    let numbers: Vec<_> = (0..10_u32)
        .map(|number| pool.construct(number).unwrap())
        .collect();

    print_pool_state("After construction", &pool);

    point.get_mut().0 = 6.0;
    println!("Point: {:?}", *point.get());
    println!("Name seen through alias: {}", *name_alias.get());
    println!("Name has {} owners", name.use_count());

    drop(numbers);
    drop(flag);
    print_pool_state("After releasing most values", &pool);

    pool.shrink_to_fit();
    print_pool_state("After shrink", &pool);

    // Handles keep working after their values have been moved.
    println!("Point after shrink: {:?}", *point.get());
    println!("Name after shrink: {}", *name.get());
}
