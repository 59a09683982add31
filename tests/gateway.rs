//! End-to-end routing through a running gateway

use rt_gateway::core::record::Value;
use rt_gateway::hot_path::PathState;
use rt_gateway::infrastructure::fd::wait_readable;
use rt_gateway::infrastructure::BufferPool;
use rt_gateway::nodes::Node;
use rt_gateway::{Config, Gateway};
use std::io::Write;
use std::time::{Duration, Instant};

const CONFIG: &str = r#"
[gateway]
hook_interval = 0.5

[api]
enabled = false

[nodes.gen]
type = "signal"
signal = "counter"
rate = 200
values = 1

[nodes.sensor]
type = "loopback"
values = 2

[nodes.mux]
type = "loopback"
values = 3

[[paths]]
in = ["gen", "sensor.data[1]", "sensor.hdr.sequence"]
out = "mux"
mode = "any"
mask = ["gen"]
queuelen = 64
"#;

fn read_all(node: &dyn Node, pool: &BufferPool) -> Vec<Vec<f64>> {
    let mut out = Vec::new();
    loop {
        let mut smps = Vec::new();
        pool.alloc_many(&mut smps, 8);
        let n = node.read(&mut smps).unwrap();
        if n == 0 {
            return out;
        }
        out.extend(smps[..n].iter().map(|s| s.data().iter().map(|v| v.as_f64()).collect()));
    }
}

#[test]
fn test_gateway_routes_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.gateway.hook_interval, 0.5);

    let mut gateway = Gateway::from_config(&config).unwrap();
    gateway.start().unwrap();
    let path = &gateway.paths()[0];
    assert_eq!(path.state(), PathState::Started);
    assert_eq!(path.samplelen(), 3);

    // Side channel update: merged into the composite without firing
    let sensor = gateway.nodes().get("sensor").unwrap().clone();
    let pool = BufferPool::new(16, 3);
    let mut smp = pool.alloc().unwrap();
    {
        let r = smp.get_mut().unwrap();
        r.sequence = 41;
        r.assign(&[Value::Float(0.0), Value::Float(2.5)]);
    }
    assert_eq!(sensor.write(&[smp]).unwrap(), 1);

    let mux = gateway.nodes().get("mux").unwrap().clone();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        if wait_readable(mux.poll_fd().unwrap(), Some(Duration::from_millis(50))).unwrap() {
            seen.extend(read_all(mux.as_ref(), &pool));
        }
        if seen.iter().any(|v| v[1] == 2.5) && seen.len() >= 5 {
            break;
        }
    }

    assert!(seen.len() >= 5);
    // Counter values from the generator keep increasing
    assert!(seen.windows(2).all(|w| w[1][0] > w[0][0]));
    // Once merged, the sensor fields ride along with every later record
    let first = seen.iter().position(|v| v[1] == 2.5).unwrap();
    assert!(seen[first..].iter().all(|v| v[1] == 2.5 && v[2] == 41.0));

    gateway.periodic();
    gateway.stop();
    assert_eq!(gateway.paths()[0].state(), PathState::Stopped);
    assert_eq!(gateway.worker().job_count(), 0);
}

#[test]
fn test_invalid_path_rejected() {
    let config: Config = r#"
        [nodes.a]
        type = "loopback"

        [[paths]]
        in = "a"
        out = "a"
        mask = ["nope"]
    "#
    .parse()
    .unwrap();

    let err = Gateway::from_config(&config).err().unwrap();
    assert!(err.to_string().contains("nope"));
}
