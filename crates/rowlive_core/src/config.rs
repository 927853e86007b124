//! Context configuration.

use std::time::Duration;

/// Configuration for a mirroring context.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether links install a pointer from each joined item back to its
    /// owner unless the link says otherwise.
    pub point_to_parent: bool,

    /// Whether collections, logs and grids load in the background.
    ///
    /// When false, construction blocks until loaded and completion callbacks
    /// are rejected.
    pub async_loading: bool,

    /// How long a field change waits for further changes before it is
    /// written back.
    pub write_delay: Duration,

    /// Whether the multi-dimension [`crate::Grid`] variant may be used.
    pub enable_grid: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            point_to_parent: true,
            async_loading: false,
            write_delay: Duration::from_millis(1000),
            enable_grid: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether links point back to their parent by default.
    #[must_use]
    pub const fn point_to_parent(mut self, value: bool) -> Self {
        self.point_to_parent = value;
        self
    }

    /// Sets background loading.
    #[must_use]
    pub const fn async_loading(mut self, value: bool) -> Self {
        self.async_loading = value;
        self
    }

    /// Sets the write-back coalescing delay.
    #[must_use]
    pub const fn write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Enables or disables the grid variant.
    #[must_use]
    pub const fn enable_grid(mut self, value: bool) -> Self {
        self.enable_grid = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.point_to_parent);
        assert!(!config.async_loading);
        assert!(config.enable_grid);
        assert_eq!(config.write_delay, Duration::from_secs(1));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .async_loading(true)
            .point_to_parent(false)
            .write_delay(Duration::from_millis(50));

        assert!(config.async_loading);
        assert!(!config.point_to_parent);
        assert_eq!(config.write_delay, Duration::from_millis(50));
    }
}
