//! # journal-store 复制演示
//!
//! 1. 在 master 分区写入带字典列的行
//! 2. 打开只有部分字典的 slave 分区
//! 3. 通过内存通道跑一轮同步，slave 追上 master
//! 4. 再跑一轮，确认无内容可发
//!
//! 运行：`RUST_LOG=journal_store=debug cargo run --example replication`

use journal_store::{
    common::JournalMode,
    meta::ColumnMetadata,
    net::{symbol::ReplicationRound, MemoryChannel},
    Partition,
};
use tracing_subscriber::EnvFilter;

fn schema() -> Vec<ColumnMetadata> {
    vec![
        ColumnMetadata::symbol("sym", 4, 64),
        ColumnMetadata::double("bid", 1024),
        ColumnMetadata::symbol("ex", 8, 16),
    ]
}

fn main() -> journal_store::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let root = std::env::temp_dir().join(format!("journal-store-demo-{}", std::process::id()));
    let master_dir = root.join("master");
    let slave_dir = root.join("slave");

    println!("═══════════════════════════════════════════════════════════");
    println!("   journal-store 字典复制演示");
    println!("═══════════════════════════════════════════════════════════\n");

    // =========================================================================
    // 1. master 写入
    // =========================================================================
    println!("【1】master 写入 6 行 ...");
    let mut master = Partition::open(&master_dir, &schema(), JournalMode::Append)?;
    let rows = [
        ("AB", 1.25, "LSE"), ("CD", 2.50, "NYSE"), ("AB", 1.30, "LSE"),
        ("EF", 9.75, "TSE"), ("GH", 0.40, "NYSE"), ("CD", 2.55, "LSE"),
    ];
    for (sym, bid, ex) in rows {
        master.put_symbol(0, sym)?;
        master.fixed_column(1)?.put_f64(bid)?;
        master.put_symbol(2, ex)?;
    }
    master.commit()?;
    println!("    rows = {}, symbol sizes = {:?}\n", master.row_count(), master.symbol_table_sizes());

    // =========================================================================
    // 2. slave 只有前两个值
    // =========================================================================
    println!("【2】slave 初始状态 ...");
    let mut slave = Partition::open(&slave_dir, &schema(), JournalMode::Append)?;
    for sym in ["AB", "CD"] {
        slave.symbol_table(0)?.put(sym)?;
    }
    slave.commit()?;
    println!("    symbol sizes = {:?}\n", slave.symbol_table_sizes());

    // =========================================================================
    // 3. 第一轮同步
    // =========================================================================
    println!("【3】第一轮同步 ...");
    let mut channel = MemoryChannel::new();
    let mut round = ReplicationRound::new(0);
    let state = round.run(&mut master, &mut slave, &mut channel)?;
    println!("    state        = {state:?}");
    println!("    symbol sizes = {:?}", slave.symbol_table_sizes());
    let sym = slave.symbol_table(0)?;
    for key in 0..sym.size() {
        println!("      sym[{key}] = {}", sym.value(key)?);
    }
    println!();

    // =========================================================================
    // 4. 第二轮同步：无内容
    // =========================================================================
    println!("【4】第二轮同步 ...");
    let state = round.run(&mut master, &mut slave, &mut channel)?;
    println!("    state = {state:?}, channel bytes left = {}\n", channel.len());

    master.close();
    slave.close();
    if let Err(e) = std::fs::remove_dir_all(&root) {
        eprintln!("cleanup of {} failed: {e}", root.display());
    }
    println!("✓ 完成");
    Ok(())
}
