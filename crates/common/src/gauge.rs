/// Raises a gauge for as long as the guard is alive.
///
/// The decrement runs on drop, so an operation that is cancelled or panics
/// still releases its slot.
#[must_use = "the gauge is decremented as soon as the guard is dropped"]
pub struct ActiveGauge(&'static str);

impl ActiveGauge {
    pub fn enter(name: &'static str) -> Self {
        metrics::gauge!(name).increment(1.0);
        Self(name)
    }
}

impl Drop for ActiveGauge {
    fn drop(&mut self) {
        metrics::gauge!(self.0).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    fn gauge_value(rendered: &str, name: &str) -> f64 {
        rendered
            .lines()
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(' '))
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or_else(|| panic!("gauge {name} not rendered:\n{rendered}"))
    }

    #[test]
    fn gauge_is_released_on_drop() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let outer = ActiveGauge::enter("test_active_ops");
            let inner = ActiveGauge::enter("test_active_ops");
            assert_eq!(gauge_value(&handle.render(), "test_active_ops"), 2.0);

            drop(inner);
            assert_eq!(gauge_value(&handle.render(), "test_active_ops"), 1.0);

            drop(outer);
            assert_eq!(gauge_value(&handle.render(), "test_active_ops"), 0.0);
        });
    }

    #[test]
    fn gauge_is_released_when_unwinding() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let result = std::panic::catch_unwind(|| {
                let _guard = ActiveGauge::enter("test_unwound_ops");
                panic!("operation aborted");
            });
            assert!(result.is_err());
        });
        assert_eq!(gauge_value(&handle.render(), "test_unwound_ops"), 0.0);
    }
}
