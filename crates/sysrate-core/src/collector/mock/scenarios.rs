//! Canned hosts for collector and sampler tests.

use super::filesystem::MockFs;

impl MockFs {
    /// A four-core x86 host with a SATA disk, an NVMe disk and a loop device.
    ///
    /// `sda1` and `nvme0n1p1` are mounted; `/sys/block` is populated.
    pub fn typical_system() -> Self {
        let fs = Self::new();

        fs.add_file("/proc/loadavg", "0.15 0.10 0.05 1/150 1234\n");
        fs.add_file(
            "/proc/stat",
            "\
cpu  12250 540 3270 85200 1150 230 110 4 2 0
cpu0 3100 140 820 21000 300 60 30 0 0 0
cpu1 3000 130 800 21500 280 55 25 4 0 0
cpu2 2950 120 790 21800 260 50 20 0 0 0
cpu3 3200 150 860 20900 310 65 35 0 2 0
ctxt 918273
btime 1760000000
",
        );

        fs.add_file(
            "/proc/diskstats",
            "\
   7       0 loop0 500 0 4000 10 0 0 0 0 0 20 10 0 0 0 0
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 0 4000 8000 0 0 0 0
   8       1 sda1 10000 80 800000 4000 5000 40 400000 2500 0 3500 6500 0 0 0 0
 259       0 nvme0n1 50000 200 2000000 10000 30000 150 1500000 8000 5 15000 18000 0 0 0 0
 259       1 nvme0n1p1 48000 190 1900000 9500 29000 140 1400000 7800 0 14500 17300 0 0 0 0
",
        );

        fs.add_file(
            "/proc/self/mountinfo",
            "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
23 22 0:21 / /proc rw,nosuid,nodev,noexec,relatime shared:2 - proc proc rw
24 22 0:22 / /sys rw,nosuid,nodev,noexec,relatime shared:3 - sysfs sysfs rw
31 22 259:1 / /data rw,noatime shared:9 - xfs /dev/nvme0n1p1 rw
",
        );

        fs.add_dir("/sys/block/loop0");
        fs.add_dir("/sys/block/sda");
        fs.add_dir("/sys/block/nvme0n1");

        let mut cpuinfo = String::new();
        for (n, mhz) in ["2400.000", "2600.000", "3000.000", "3200.000"]
            .iter()
            .enumerate()
        {
            cpuinfo.push_str(&format!(
                "processor\t: {n}\nvendor_id\t: GenuineIntel\nmodel name\t: Xeon(R) CPU E5-2680 @ 2.40GHz\ncpu MHz\t\t: {mhz}\ncache size\t: 8192 KB\n\n"
            ));
        }
        fs.add_file("/proc/cpuinfo", cpuinfo);

        fs
    }

    /// A two-core ARM-like guest: no `/sys/block`, no mountinfo and no
    /// `cpu MHz` in cpuinfo, so every collector fallback path is taken.
    pub fn minimal_system() -> Self {
        let fs = Self::new();

        fs.add_file("/proc/loadavg", "1.20 0.90 0.70 2/80 999\n");
        fs.add_file(
            "/proc/stat",
            "\
cpu  2000 0 1000 16000 0 0 0 0 0 0
cpu0 1000 0 500 8000 0 0 0 0 0 0
cpu1 1000 0 500 8000 0 0 0 0 0 0
ctxt 1000
",
        );
        fs.add_file(
            "/proc/diskstats",
            "\
   7       0 loop0 10 0 80 1 0 0 0 0 0 1 1 0 0 0 0
 253       0 vda 100 0 2000 50 80 0 1000 40 0 60 90 0 0 0 0
 253       1 vda1 90 0 1900 45 70 0 900 35 0 55 80 0 0 0 0
",
        );
        fs.add_file(
            "/proc/cpuinfo",
            "processor\t: 0\nBogoMIPS\t: 48.00\n\nprocessor\t: 1\nBogoMIPS\t: 48.00\n",
        );

        fs.add_dir("/sys/devices/system/cpu/cpufreq");
        fs.add_dir("/sys/devices/system/cpu/cpuidle");
        fs.add_file(
            "/sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq",
            "1800000\n",
        );
        fs.add_file(
            "/sys/devices/system/cpu/cpu1/cpufreq/scaling_cur_freq",
            "1200000\n",
        );

        fs
    }
}
