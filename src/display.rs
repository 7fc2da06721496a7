//! Console output for the CLI: periodic counters, the end-of-run summary
//! and the connection listing.

use crate::conntrack::Status;
use crate::pipeline::AggregatedTick;
use crate::table::{ConnSnapshot, TableStats};

/// Statuses with at least one record, as `NAME=count` pairs.
pub fn format_status_counts(counts: &[usize; Status::COUNT]) -> String {
    Status::ALL
        .iter()
        .zip(counts)
        .filter(|(_, count)| **count > 0)
        .map(|(status, count)| format!("{}={}", status, count))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Print one line of merged counters.
pub fn print_stats_tick(tick: &AggregatedTick) {
    println!(
        "[stats] {:>8.1} fps {:>8.3} Mbps | conns {:>6} | accepted {} rejected {} | {}",
        tick.fps,
        tick.mbps,
        tick.active_conns,
        tick.totals.accepted(),
        tick.totals.rejected,
        format_status_counts(&tick.status_counts)
    );
}

/// Print the end-of-run summary.
pub fn print_summary(frames: u64, skipped: u64, stats: &TableStats, remaining: usize) {
    println!();
    println!("{}", "=".repeat(50));
    println!("Tracking complete.");
    println!("  Frames read:        {}", frames);
    println!("  Non-TCP skipped:    {}", skipped);
    println!("  Segments tracked:   {}", stats.segments);
    println!("  Accepted:           {}", stats.accepted());
    println!("    committed:        {}", stats.committed);
    println!("    ignored:          {}", stats.ignored);
    println!("    liberal:          {}", stats.liberal);
    println!("    closed:           {}", stats.closed);
    println!("  Rejected:           {}", stats.rejected);
    for (kind, count) in &stats.reject_reasons {
        println!("    {:<18}{}", format!("{}:", kind), count);
    }
    println!("  Out of sync:        {}", stats.out_of_sync);
    println!("  Reopened:           {}", stats.reopened);
    println!("  Connections:        {} opened, {} expired, {} evicted, {} open at exit",
        stats.created, stats.expired, stats.evicted, remaining);
    println!("{}", "=".repeat(50));
}

/// One line per record, oldest first.
pub fn print_connections(conns: &[ConnSnapshot], limit: usize) {
    for conn in conns.iter().take(limit) {
        println!("{}", format_connection(conn));
    }
    if conns.len() > limit {
        println!("  ... ({} more)", conns.len() - limit);
    }
}

fn format_connection(conn: &ConnSnapshot) -> String {
    let mut flags = Vec::new();
    if conn.assured {
        flags.push("ASSURED");
    }
    if !conn.seen_reply {
        flags.push("UNREPLIED");
    }
    let mut line = format!(
        "  {:<11} {} -> {} segs={} retrans={}",
        conn.status.as_str(),
        conn.originator,
        conn.responder,
        conn.segments,
        conn.retrans
    );
    if !flags.is_empty() {
        line.push_str(&format!(" [{}]", flags.join(",")));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conntrack::DirectionState;
    use crate::table::Endpoint;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn status_counts_skip_empty() {
        let mut counts = [0; Status::COUNT];
        counts[Status::Established.index()] = 4;
        counts[Status::TimeWait.index()] = 1;
        assert_eq!(format_status_counts(&counts), "ESTABLISHED=4 TIME_WAIT=1");
        assert_eq!(format_status_counts(&[0; Status::COUNT]), "");
    }

    #[test]
    fn connection_line() {
        let ep = |last, port| Endpoint {
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
            port,
        };
        let conn = ConnSnapshot {
            originator: ep(2, 40000),
            responder: ep(1, 80),
            status: Status::SynSent,
            assured: false,
            seen_reply: false,
            retrans: 0,
            first_seen: 0.0,
            last_seen: 0.0,
            expires_at: 120.0,
            segments: 1,
            original: DirectionState::default(),
            reply: DirectionState::default(),
        };
        assert_eq!(
            format_connection(&conn),
            "  SYN_SENT    10.0.0.2:40000 -> 10.0.0.1:80 segs=1 retrans=0 [UNREPLIED]"
        );
    }
}
