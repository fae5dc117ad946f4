//! Console formatting for averaged reports.

use crate::config::DisplayOptions;
use crate::metrics::data::{AverageReport, DeviceSample, GpuProcess, MonitorReport};
use std::fmt;

/// Render one line per device in the style of `gpustat`.
///
/// Averages are truncated to whole units before printing.
pub fn render_report(report: &AverageReport, options: &DisplayOptions) -> String {
    let mut out = String::new();
    if options.show_header {
        out.push_str(&format!(
            "Average over {} snapshot{}\n",
            report.snapshots,
            if report.snapshots == 1 { "" } else { "s" }
        ));
    }

    let name_width = report
        .devices
        .iter()
        .map(|device| device.name.chars().count())
        .max()
        .unwrap_or(0);

    for device in report.to_samples() {
        out.push_str(&render_device(&device, name_width, options));
        out.push('\n');
    }
    out
}

/// Render the whole-series and running averages one after the other.
pub fn render_monitor_report(report: &MonitorReport, options: &DisplayOptions) -> String {
    let mut out = String::from("Per-device average over the series:\n");
    out.push_str(&render_report(&report.per_device_average, options));
    out.push_str("Running average:\n");
    out.push_str(&render_report(&report.running_average, options));
    if !report.agrees_within(1e-6) {
        out.push_str("Warning: running and series averages disagree\n");
    }
    out
}

fn render_device(device: &DeviceSample, name_width: usize, options: &DisplayOptions) -> String {
    let mut line = format!(
        "[{}] {:<width$} | {:>3}°C, ",
        device.index,
        device.name,
        device.temperature,
        width = name_width
    );
    if options.show_fan_speed {
        line.push_str(&format!("{:>3} %, ", device.fan_speed));
    }
    line.push_str(&format!("{:>3} %", device.utilization));
    if options.show_power {
        line.push_str(&format!(
            ", {:>4} / {:>4} W",
            device.power_draw, device.power_limit
        ));
    }
    line.push_str(&format!(
        " | {:>6} / {:>6} MB |",
        device.memory_used, device.memory_total
    ));

    if options.show_processes {
        for process in &device.processes {
            line.push(' ');
            line.push_str(&render_process(process, options));
        }
    }
    line
}

fn render_process(process: &GpuProcess, options: &DisplayOptions) -> String {
    let mut label = String::new();
    if options.show_user {
        if let Some(user) = &process.username {
            label.push_str(user);
            label.push(':');
        }
    }
    if options.show_cmd {
        label.push_str(&process.command);
    }
    if options.show_pid {
        label.push('/');
        label.push_str(&process.pid.to_string());
    }
    format!("{}({}M)", label, process.gpu_memory_usage)
}

impl fmt::Display for AverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_report(self, &DisplayOptions::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::data::DeviceAverage;

    fn report() -> AverageReport {
        let sample = DeviceSample {
            memory_total: 24576,
            memory_used: 1024,
            temperature: 45,
            fan_speed: 30,
            utilization: 12,
            power_draw: 110,
            power_limit: 350,
            processes: vec![GpuProcess {
                pid: 4242,
                command: "python".to_string(),
                username: Some("alice".to_string()),
                gpu_memory_usage: 900,
            }],
            ..DeviceSample::new(0, "GPU-0", "RTX 3090")
        };
        let mut average = DeviceAverage::from_sample(&sample);
        average.utilization = 12.75;
        AverageReport {
            snapshots: 4,
            devices: vec![average],
        }
    }

    #[test]
    fn test_default_rendering() {
        let text = report().to_string();
        assert!(text.starts_with("Average over 4 snapshots\n"));
        assert!(text.contains("[0] RTX 3090 |  45°C,  30 %,  12 %,  110 /  350 W"));
        assert!(text.contains("  1024 /  24576 MB |"));
        assert!(text.contains("alice:python(900M)"));
    }

    #[test]
    fn test_options_hide_fields() {
        let options = DisplayOptions {
            show_header: false,
            show_fan_speed: false,
            show_power: false,
            show_processes: false,
            ..DisplayOptions::default()
        };
        let text = render_report(&report(), &options);
        assert!(!text.contains("Average over"));
        assert!(!text.contains(" W"));
        assert!(!text.contains("python"));
        assert!(text.contains("45°C,  12 % |"));
    }

    #[test]
    fn test_name_column_counts_characters() {
        let mut report = report();
        report.devices[0].name = "Größe".to_string();
        let text = render_report(&report, &DisplayOptions::default());
        assert!(text.contains("[0] Größe |  45°C"));
    }

    #[test]
    fn test_monitor_report_shows_both_averages() {
        let mut running = report();
        running.devices[0].utilization = 12.25;
        let report = MonitorReport {
            per_device_average: report(),
            running_average: running,
        };
        let text = render_monitor_report(&report, &DisplayOptions::default());
        assert!(text.starts_with("Per-device average over the series:\n"));
        assert!(text.contains("Running average:\n"));
        assert_eq!(text.matches("[0] RTX 3090").count(), 2);
        assert!(text.ends_with("running and series averages disagree\n"));

        let agreeing = MonitorReport {
            per_device_average: report.per_device_average.clone(),
            running_average: report.per_device_average.clone(),
        };
        let text = render_monitor_report(&agreeing, &DisplayOptions::default());
        assert!(!text.contains("disagree"));
    }

    #[test]
    fn test_process_pid_only() {
        let options = DisplayOptions {
            show_user: false,
            show_cmd: false,
            show_pid: true,
            ..DisplayOptions::default()
        };
        let text = render_report(&report(), &options);
        assert!(text.contains("/4242(900M)"));
    }
}
