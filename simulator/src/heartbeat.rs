use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

const STATUS_LENGTH: usize = 11;

/// Heartbeat body in the station wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub time: String,
    pub auto: bool,
    pub dome: Dome,
    pub disk: Disk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dome {
    pub s: Option<String>,
    pub t: Option<Climate>,
    pub z: Option<Cover>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Climate {
    pub t_sht: f64,
    pub h_sht: f64,
    pub t_lens: f64,
    pub t_cpu: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cover {
    pub sp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disk {
    pub prim: Volume,
    pub perm: Volume,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Volume {
    pub a: f64,
    pub t: f64,
}

/// One simulated station drifting between heartbeats
#[derive(Debug, Clone)]
pub struct SimulatedStation {
    pub code: String,
    temperature: f64,
    humidity: f64,
    primary_available: f64,
    permanent_available: f64,
}

impl SimulatedStation {
    pub fn new(code: String, rng: &mut impl Rng) -> Self {
        Self {
            code,
            temperature: rng.gen_range(-5.0..20.0),
            humidity: rng.gen_range(40.0..90.0),
            primary_available: rng.gen_range(100.0..500.0),
            permanent_available: rng.gen_range(1000.0..4000.0),
        }
    }

    pub fn topic(&self) -> String {
        format!("station/{}/heartbeat", self.code)
    }

    /// Advance the station one step and describe it
    ///
    /// With probability `malformed_ratio` the status string is truncated, the
    /// way a station running older firmware would send it.
    pub fn next_heartbeat(&mut self, now: DateTime<Utc>, malformed_ratio: f64, rng: &mut impl Rng) -> Heartbeat {
        self.temperature += rng.gen_range(-0.3..0.3);
        self.humidity = (self.humidity + rng.gen_range(-1.0..1.0)).clamp(5.0, 100.0);
        self.primary_available = (self.primary_available - rng.gen_range(0.0..0.5)).max(0.0);
        self.permanent_available = (self.permanent_available - rng.gen_range(0.0..0.2)).max(0.0);

        let night = !(6..18).contains(&now.hour());
        let raining = rng.gen_bool(0.03);
        let open = night && !raining;

        let mut status = status_string(open, raining, self.humidity > 85.0);
        if rng.gen_bool(malformed_ratio) {
            status.truncate(rng.gen_range(0..STATUS_LENGTH));
        }

        Heartbeat {
            time: now.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            auto: !rng.gen_bool(0.01),
            dome: Dome {
                s: Some(status),
                t: Some(Climate {
                    t_sht: round(self.temperature),
                    h_sht: round(self.humidity),
                    t_lens: round(self.temperature + rng.gen_range(0.0..3.0)),
                    t_cpu: round(rng.gen_range(35.0..60.0)),
                }),
                z: Some(Cover {
                    sp: if open { 100 } else { 0 },
                }),
            },
            disk: Disk {
                prim: Volume {
                    a: round(self.primary_available),
                    t: 500.0,
                },
                perm: Volume {
                    a: round(self.permanent_available),
                    t: 4000.0,
                },
            },
        }
    }
}

/// Fixed-width status string, `-` for an absent flag
fn status_string(open: bool, raining: bool, heating: bool) -> String {
    let flags = [
        !open,   // closed end switch
        false,   // motor
        open,    // open end switch
        false,   // safety
        heating, // lens heating
        heating, // camera heating
        open,    // intensifier
        open,    // fan
        raining, // rain sensor
        !open,   // light sensor
        true,    // computer power
    ];
    flags
        .iter()
        .map(|set| if *set { 'X' } else { '-' })
        .collect()
}

fn round(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
