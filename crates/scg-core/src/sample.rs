use serde::{Deserialize, Serialize};

/// A single raw tri-axial accelerometer reading. `t` is the client-supplied
/// timestamp in milliseconds; it must be monotonic within one client's
/// stream for resampling to be meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub t: f64,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
}

/// One point of the uniform 100 Hz signal produced by the resampler.
/// Only the vertical axis survives resampling.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResampledPoint {
    pub t: i64,
    pub az: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_wire_field_names() {
        let s = Sample {
            t: 12.5,
            ax: 0.1,
            ay: -0.2,
            az: 9.8,
        };
        let json = serde_json::to_value(s).unwrap();
        assert_eq!(json["t"], 12.5);
        assert_eq!(json["ax"], 0.1);
        assert_eq!(json["ay"], -0.2);
        assert_eq!(json["az"], 9.8);
    }

    #[test]
    fn sample_deserializes_from_client_shape() {
        let s: Sample = serde_json::from_str(r#"{"t":100,"ax":0,"ay":0,"az":1.5}"#).unwrap();
        assert_eq!(s.t, 100.0);
        assert_eq!(s.az, 1.5);
    }
}
