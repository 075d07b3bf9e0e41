use crate::classify::AddressClassifier;
use crate::report::{ConnectionRecord, PartitionedConnections};

/// Splits connections by the scope of their remote peer in a single pass,
/// keeping the input order within each side.
pub fn partition(
    connections: impl IntoIterator<Item = ConnectionRecord>,
    classifier: &AddressClassifier,
) -> PartitionedConnections {
    let mut out = PartitionedConnections::default();
    for conn in connections {
        if classifier.is_internal(&conn.remote_address) {
            out.internal.push(conn);
        } else {
            out.external.push(conn);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(remote: &str, port: u16) -> ConnectionRecord {
        ConnectionRecord {
            local_address: "10.0.0.5".to_string(),
            local_port: 50000 + port,
            remote_address: remote.to_string(),
            remote_port: port,
            state: "Established".to_string(),
            creation_time: None,
            owning_process_id: Some(1000 + u32::from(port)),
            process_name: None,
        }
    }

    #[test]
    fn split_is_total_and_order_preserving() {
        let input = vec![
            conn("8.8.8.8", 1),
            conn("10.1.1.1", 2),
            conn("172.20.0.3", 3),
            conn("1.1.1.1", 4),
            conn("154.17.0.1", 5),
            conn("192.168.0.9", 6),
        ];
        let out = partition(input.clone(), &AddressClassifier::default());

        assert_eq!(out.len(), input.len());
        let internal_ports: Vec<u16> = out.internal.iter().map(|c| c.remote_port).collect();
        let external_ports: Vec<u16> = out.external.iter().map(|c| c.remote_port).collect();
        assert_eq!(internal_ports, vec![2, 3, 6]);
        assert_eq!(external_ports, vec![1, 4, 5]);

        for c in &input {
            let hits = out.internal.iter().filter(|x| *x == c).count()
                + out.external.iter().filter(|x| *x == c).count();
            assert_eq!(hits, 1, "{} must land on exactly one side", c.remote_address);
        }
    }

    #[test]
    fn empty_input() {
        let out = partition(Vec::new(), &AddressClassifier::default());
        assert!(out.is_empty());
    }

    #[test]
    fn duplicate_connections_are_kept() {
        let input = vec![conn("10.0.0.1", 7), conn("10.0.0.1", 7)];
        let out = partition(input, &AddressClassifier::default());
        assert_eq!(out.internal.len(), 2);
        assert!(out.external.is_empty());
    }
}
