use std::hash::Hasher;
use std::time::Instant;

use clap::Parser;
use clap::ValueEnum;
use rhh_funnel::FoldKeyHasher;
use rhh_funnel::Funnel;
use rhh_funnel::FunnelConfig;
use rhh_funnel::KeyHasher;
use rhh_funnel::RobinHoodTable;
use rhh_funnel::StdKeyHasher;
use siphasher::sip::SipHasher;

const VALUE_SIZE: usize = 8;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KeyKind {
    /// 6 printable bytes
    SString,
    /// 32 printable bytes
    MString,
    /// 256 printable bytes
    LString,
    /// 8-byte little-endian counter
    LInt,
}

impl KeyKind {
    fn len(self) -> usize {
        match self {
            KeyKind::SString => 6,
            KeyKind::MString => 32,
            KeyKind::LString => 256,
            KeyKind::LInt => 8,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum HasherKind {
    Fold,
    Sip,
    Std,
}

/// Funnels 2^n inserts then 2^n lookups through a Robin Hood table and reports
/// the wall-clock time of each phase.
#[derive(Parser, Debug)]
struct Args {
    /// Number of elements as a power of two.
    #[arg(short = 'n', default_value_t = 20)]
    num_power: u32,

    /// Number of times to repeat the run.
    #[arg(short = 'r', default_value_t = 1)]
    repeat: u32,

    #[arg(short = 'k', value_enum, default_value_t = KeyKind::SString)]
    key_kind: KeyKind,

    /// Load factor of the table, inside (0, 1).
    #[arg(short = 'l', default_value_t = 0.8)]
    load: f64,

    /// Print the probe distance histogram after each run.
    #[arg(short = 'p')]
    print_stats: bool,

    /// Funnel slot size as a power of two.
    #[arg(short = 'a', default_value_t = 12)]
    slot_size_power: u32,

    /// Funnel partition size as a power of two.
    #[arg(short = 'b', default_value_t = 12)]
    partition_size_power: u32,

    #[arg(short = 'f', value_enum, default_value_t = HasherKind::Fold)]
    hasher: HasherKind,
}

/// Writes the six base-64 digits of `counter`, least significant first, as
/// printable ASCII starting at `!`.
fn digits(counter: u64, out: &mut [u8]) {
    for (i, byte) in out.iter_mut().take(6).enumerate() {
        *byte = 0x21 + ((counter >> (6 * i)) & 0x3f) as u8;
    }
}

/// Calls `f` with each of the `count` keys of `kind`, in generation order.
fn for_each_key(kind: KeyKind, count: u64, mut f: impl FnMut(&[u8])) {
    let mut key = vec![b'-'; kind.len()];
    for counter in 0..count {
        match kind {
            KeyKind::LInt => key.copy_from_slice(&counter.to_le_bytes()),
            _ => {
                for block in key.chunks_mut(8) {
                    digits(counter, block);
                }
            }
        }
        f(&key);
    }
}

fn run<H: KeyHasher + Clone>(args: &Args, hasher: H) {
    let num = 1u64 << args.num_power;
    let config = FunnelConfig::default()
        .with_slot_size(1 << args.slot_size_power)
        .with_partition_size(1 << args.partition_size_power);
    println!("running elements {num}");

    let mut objcnt = 0;
    let mut val_sum = 0u64;

    for attempt in 1..=args.repeat {
        println!("attempt {attempt}");
        let mut table = match RobinHoodTable::with_hasher(
            num,
            args.load,
            args.key_kind.len(),
            VALUE_SIZE,
            hasher.clone(),
        ) {
            Ok(table) => table,
            Err(err) => {
                eprintln!("Create RobinHoodTable: {err}");
                std::process::exit(1);
            }
        };

        let insert_start = Instant::now();
        let mut funnel = Funnel::new(&mut table, config);
        let mut value = 0u64;
        for_each_key(args.key_kind, num, |key| {
            if let Err(err) = funnel.insert(key, &value.to_le_bytes()) {
                eprintln!("insert {value}: {err}");
            }
            value += 1;
        });
        if let Err(err) = funnel.insert_flush() {
            eprintln!("insert flush: {err}");
        }
        funnel.destroy();
        let insert_time = insert_start.elapsed();
        println!("insert finished");

        let query_start = Instant::now();
        let mut funnel = Funnel::with_callback(
            &mut table,
            |_: &[u8], value: Option<&[u8]>, _: ()| {
                if let Some(value) = value.and_then(|v| <[u8; VALUE_SIZE]>::try_from(v).ok()) {
                    val_sum = val_sum.wrapping_add(u64::from_le_bytes(value));
                }
            },
            config,
        );
        for_each_key(args.key_kind, num, |key| {
            if let Err(err) = funnel.get(key, ()) {
                eprintln!("get: {err}");
            }
        });
        funnel.get_flush();
        funnel.destroy();
        let query_time = query_start.elapsed();

        println!("Funnel Insert time: {:.6}", insert_time.as_secs_f64());
        println!("Funnel Query time: {:.6}", query_time.as_secs_f64());

        if args.print_stats {
            println!("{table:#?}");
            print!("{}", table.stats());
        }
        objcnt = table.len();
    }

    println!("objcnt: {objcnt} val_sum: {val_sum}");
}

fn main() {
    let args = Args::parse();
    if !(args.load > 0.0 && args.load < 1.0) {
        eprintln!("load factor must lie within (0, 1), got {}", args.load);
        std::process::exit(2);
    }

    match args.hasher {
        HasherKind::Fold => run(&args, FoldKeyHasher::default()),
        HasherKind::Sip => run(&args, |key: &[u8]| {
            let mut hasher = SipHasher::new_with_keys(0, 0);
            hasher.write(key);
            hasher.finish()
        }),
        HasherKind::Std => run(&args, StdKeyHasher),
    }
}
