use crate::report::{DiskInfo, InterfaceInfo, SystemDetails};
use sysinfo::{CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};

pub fn collect_system(system: &mut System) -> SystemDetails {
    system.refresh_cpu();
    system.refresh_memory();
    system.refresh_disks_list();
    system.refresh_disks();
    system.refresh_networks_list();
    system.refresh_networks();

    let disks = system
        .disks()
        .iter()
        .map(|d| DiskInfo {
            name: d.name().to_string_lossy().to_string(),
            mount: d.mount_point().to_string_lossy().to_string(),
            file_system: String::from_utf8_lossy(d.file_system()).to_string(),
            total_bytes: d.total_space(),
            available_bytes: d.available_space(),
        })
        .collect();

    let mut interfaces: Vec<InterfaceInfo> = system
        .networks()
        .iter()
        .map(|(iface, data)| InterfaceInfo {
            name: iface.to_string(),
            rx_bytes_total: data.total_received(),
            tx_bytes_total: data.total_transmitted(),
        })
        .collect();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));

    SystemDetails {
        host_name: system.host_name(),
        os_name: system.name(),
        os_version: system.os_version(),
        long_os_version: system.long_os_version(),
        kernel_version: system.kernel_version(),
        distribution_id: system.distribution_id(),
        cpu_brand: system.cpus().first().map(|c| c.brand().trim().to_string()),
        cpu_core_count: system.cpus().len() as u32,
        physical_core_count: system.physical_core_count().map(|n| n as u32),
        memory_total_bytes: system.total_memory(),
        swap_total_bytes: system.total_swap(),
        boot_time_unix: system.boot_time(),
        uptime_seconds: system.uptime(),
        disks,
        interfaces,
    }
}
