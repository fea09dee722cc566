//! Screen Configuration Module
//!
//! Loads the server's screen configuration from a TOML file: an ordered list
//! of screens, each with one or more display modes (pixel size, twips size,
//! rotation). Loaded once at first use and read-only thereafter.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::ws::common::{GraphicsOrientation, PixelTwipsAndRot, Vec2};

/// One display mode of a screen as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenMode {
    /// Width and height in pixels.
    pub pixel_size: [i32; 2],
    /// Physical width and height in twips (1/1440 inch).
    pub twips_size: [i32; 2],
    /// Rotation in degrees, one of 0/90/180/270.
    pub rotation: i32,
}

impl ScreenMode {
    /// Resolve into the runtime descriptor handed out to sessions.
    pub fn descriptor(&self) -> PixelTwipsAndRot {
        PixelTwipsAndRot {
            pixel_size: Vec2::new(self.pixel_size[0], self.pixel_size[1]),
            twips_size: Vec2::new(self.twips_size[0], self.twips_size[1]),
            orientation: GraphicsOrientation::from_degrees(self.rotation),
        }
    }
}

/// One physical screen: an ordered list of modes, index 0 is the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screen {
    pub modes: Vec<ScreenMode>,
}

impl Screen {
    /// The mode the screen starts in.
    pub fn default_mode(&self) -> &ScreenMode {
        &self.modes[0]
    }
}

/// Parsed screen configuration for the whole server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    pub screens: Vec<Screen>,
}

impl Default for WsConfig {
    fn default() -> Self {
        // Single 176x208 portrait screen, the layout most legacy guests assume.
        Self {
            screens: vec![Screen {
                modes: vec![ScreenMode {
                    pixel_size: [176, 208],
                    twips_size: [1865, 2204],
                    rotation: 0,
                }],
            }],
        }
    }
}

impl WsConfig {
    /// Load configuration from a file, or use the built-in default if the
    /// file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Screen config not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read screen config file")?;
        let config = Self::parse(&content)?;

        info!(
            "Screen configuration loaded from {:?} ({} screens)",
            path,
            config.screens.len()
        );
        debug!("Screen config: {:?}", config);

        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: WsConfig =
            toml::from_str(content).context("Failed to parse screen config file")?;

        for (i, screen) in config.screens.iter().enumerate() {
            if screen.modes.is_empty() {
                anyhow::bail!("screen {} has no display modes", i);
            }
            for mode in &screen.modes {
                if !matches!(mode.rotation, 0 | 90 | 180 | 270) {
                    anyhow::bail!(
                        "screen {} has invalid rotation {} (must be 0/90/180/270)",
                        i,
                        mode.rotation
                    );
                }
            }
        }

        Ok(config)
    }
}
