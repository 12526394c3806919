/// Example demonstrating the rule manager and engine updates
///
/// This shows how to:
/// - Register rules and share patterns between them
/// - Consume engine snapshots published after every registration
/// - Scan both directions of a connection with a published engine
/// - Turn pattern matches into triggered rules
///
/// Run with:
///   cargo run --example rule_manager_demo

use streamsig::engine::{EngineConfig, PublishMode};
use streamsig::rules::{
    Connection, Direction, DirectionalMatches, Filter, Pattern, RegexFlags, RuleDraft, RuleManager,
};
use streamsig::storage::{MemoryRuleStore, WriteContext};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    println!("=== streamsig Rule Manager Demo ===\n");

    // ============================================================
    // Part 1: Registering rules
    // ============================================================
    println!("Part 1: Registering rules\n");
    println!("{}", "=".repeat(60));

    let config = EngineConfig {
        publish_mode: PublishMode::Supersede,
        ..Default::default()
    };
    let manager = RuleManager::new(Arc::new(MemoryRuleStore::new()), config);
    let updates = manager.subscribe_engine_updates();
    let ctx = WriteContext::with_timeout(Duration::from_secs(1));

    let flag = manager
        .set_flag_rule(&ctx, r"FLAG\{[A-Za-z0-9]+\}")
        .expect("flag rule");

    let traversal = RuleDraft::new("path traversal", "#ffa500")
        .with_notes("Requests walking up the directory tree")
        .with_pattern(
            Pattern::new(r"\.\./")
                .with_direction(Direction::ToServer)
                .with_occurrences(2, 0),
        )
        .with_filter(Filter {
            service_port: 8080,
            ..Default::default()
        });
    let traversal = manager.add_rule(&ctx, traversal).expect("traversal rule");

    let admin = RuleDraft::new("admin access", "#00f").with_pattern(
        Pattern::new("/admin").with_flags(RegexFlags {
            caseless: true,
            single_match: true,
            ..Default::default()
        }),
    );
    let admin = manager.add_rule(&ctx, admin).expect("admin rule");

    for rule in manager.list_rules() {
        println!("  {}", rule);
    }

    let stats = manager.stats();
    println!(
        "\n{} rules, {} distinct patterns",
        stats.rules, stats.patterns
    );

    // Duplicate names are refused
    match manager.add_rule(&ctx, RuleDraft::new("flag", "#fff")) {
        Ok(_) => println!("unexpected: duplicate name accepted"),
        Err(e) => println!("Rejected: {}", e),
    }

    // ============================================================
    // Part 2: Engine updates
    // ============================================================
    println!("\nPart 2: Engine updates\n");
    println!("{}", "=".repeat(60));

    let snapshot = updates.recv().expect("engine snapshot");
    println!(
        "Received engine version {} with {} patterns",
        snapshot.version, snapshot.pattern_count
    );
    assert_eq!(snapshot.version, admin);

    // ============================================================
    // Part 3: Scanning a connection
    // ============================================================
    println!("\nPart 3: Scanning a connection\n");
    println!("{}", "=".repeat(60));

    let mut client = snapshot.engine.open_stream();
    let mut server = snapshot.engine.open_stream();

    let client_chunks: [&[u8]; 3] = [
        b"GET /static/../../",
        b"etc/passwd HTTP/1.1\r\n",
        b"GET /ADMIN HTTP/1.1\r\n",
    ];
    let server_chunks: [&[u8]; 2] = [b"HTTP/1.1 200 OK\r\n\r\nroot:x:0:0 FLAG{", b"d3m0}"];

    for chunk in client_chunks {
        for m in client.scan(chunk) {
            println!("  client: pattern {} at {}..{}", m.pattern_id, m.start, m.end);
        }
    }
    for chunk in server_chunks {
        for m in server.scan(chunk) {
            println!("  server: pattern {} at {}..{}", m.pattern_id, m.start, m.end);
        }
    }

    let connection = Connection {
        client_address: "192.168.1.20".parse().expect("address"),
        client_port: 51234,
        server_address: "192.168.1.1".parse().expect("address"),
        service_port: 8080,
        duration: Duration::from_millis(120),
        client_bytes: client.position(),
        server_bytes: server.position(),
    };

    let matches = DirectionalMatches::from_streams(&client, &server);
    let triggered = manager.annotate_matches(&connection, &matches);

    println!("\nTriggered rules:");
    for id in &triggered {
        if let Some(rule) = manager.get_rule(*id) {
            println!("  {} {}", rule.name, rule.color);
        }
    }

    assert!(triggered.contains(&flag));
    assert!(triggered.contains(&traversal));
    assert!(triggered.contains(&admin));
}
