//! Plotting of closed-loop runs using gnuplot

use gnuplot::{AutoOption, AxesCommon, Caption, Color, Figure, LineWidth, PointSize, PointSymbol};

use crate::common::{MpcError, MpcResult, Path2D, Pose2D};

/// Color palette for consistent styling
pub mod colors {
    pub const TRACK: &str = "#000000";
    pub const DRIVEN: &str = "#35C788";
    pub const PREDICTED: &str = "#00A000";
    pub const REFERENCE: &str = "#E0B000";
    pub const VEHICLE: &str = "#0000FF";
    pub const STEERING: &str = "#DD3355";
    pub const THROTTLE: &str = "#0000FF";
    pub const CTE: &str = "#FFA500";
}

/// Style for path rendering
#[derive(Debug, Clone)]
pub struct PathStyle {
    pub color: String,
    pub line_width: f64,
    pub caption: String,
}

impl PathStyle {
    pub fn new(color: &str, caption: &str) -> Self {
        Self {
            color: color.to_string(),
            line_width: 2.0,
            caption: caption.to_string(),
        }
    }

    pub fn with_line_width(mut self, width: f64) -> Self {
        self.line_width = width;
        self
    }
}

enum Layer {
    Line {
        x: Vec<f64>,
        y: Vec<f64>,
        style: PathStyle,
    },
    Markers {
        x: Vec<f64>,
        y: Vec<f64>,
        color: &'static str,
        size: f64,
    },
}

/// Global-frame plot of the track, the driven path and MPC predictions
///
/// Layers are collected and drawn onto a single set of axes when saved.
pub struct TrackPlot {
    title: String,
    aspect_ratio: Option<f64>,
    layers: Vec<Layer>,
}

impl TrackPlot {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            aspect_ratio: Some(1.0),
            layers: Vec::new(),
        }
    }

    pub fn plot_path(&mut self, path: &Path2D, style: &PathStyle) -> &mut Self {
        self.layers.push(Layer::Line {
            x: path.x_coords(),
            y: path.y_coords(),
            style: style.clone(),
        });
        self
    }

    pub fn plot_track(&mut self, track: &Path2D) -> &mut Self {
        self.plot_path(track, &PathStyle::new(colors::TRACK, "Track").with_line_width(1.0))
    }

    pub fn plot_driven(&mut self, driven: &Path2D) -> &mut Self {
        self.plot_path(driven, &PathStyle::new(colors::DRIVEN, "Driven"))
    }

    /// Predicted trajectory, already transformed to the global frame
    pub fn plot_prediction(&mut self, predicted: &Path2D) -> &mut Self {
        self.layers.push(Layer::Markers {
            x: predicted.x_coords(),
            y: predicted.y_coords(),
            color: colors::PREDICTED,
            size: 0.4,
        });
        self
    }

    /// Vehicle position with a heading tick
    pub fn plot_vehicle(&mut self, pose: &Pose2D, size: f64) -> &mut Self {
        let end_x = pose.x + size * pose.yaw.cos();
        let end_y = pose.y + size * pose.yaw.sin();
        self.layers.push(Layer::Markers {
            x: vec![pose.x],
            y: vec![pose.y],
            color: colors::VEHICLE,
            size: 1.0,
        });
        self.layers.push(Layer::Line {
            x: vec![pose.x, end_x],
            y: vec![pose.y, end_y],
            style: PathStyle::new(colors::VEHICLE, ""),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn save_svg(&self, path: &str) -> MpcResult<()> {
        let mut figure = Figure::new();
        let axes = figure.axes2d();
        axes.set_title(&self.title, &[]);
        axes.set_x_label("X [m]", &[]);
        axes.set_y_label("Y [m]", &[]);
        if let Some(ratio) = self.aspect_ratio {
            axes.set_aspect_ratio(AutoOption::Fix(ratio));
        }

        for layer in &self.layers {
            match layer {
                Layer::Line { x, y, style } if style.caption.is_empty() => {
                    axes.lines(x, y, &[Color(style.color.as_str()), LineWidth(style.line_width)]);
                }
                Layer::Line { x, y, style } => {
                    axes.lines(
                        x,
                        y,
                        &[
                            Caption(&style.caption),
                            Color(style.color.as_str()),
                            LineWidth(style.line_width),
                        ],
                    );
                }
                Layer::Markers { x, y, color, size } => {
                    axes.points(x, y, &[Color(*color), PointSymbol('O'), PointSize(*size)]);
                }
            }
        }

        figure
            .save_to_svg(path, 800, 600)
            .map_err(|e| MpcError::Visualization(e.to_string()))
    }
}

/// Time histories of the command and tracking error
pub fn save_history_svg(
    path: &str,
    time: &[f64],
    steering: &[f64],
    throttle: &[f64],
    cte: &[f64],
) -> MpcResult<()> {
    let mut figure = Figure::new();
    figure
        .axes2d()
        .set_title("Command history", &[])
        .set_x_label("t [s]", &[])
        .lines(time, steering, &[Caption("Steering"), Color(colors::STEERING)])
        .lines(time, throttle, &[Caption("Throttle"), Color(colors::THROTTLE)])
        .lines(time, cte, &[Caption("CTE [m]"), Color(colors::CTE)]);
    figure
        .save_to_svg(path, 800, 400)
        .map_err(|e| MpcError::Visualization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_plot_creation() {
        let mut plot = TrackPlot::new("Run");
        assert!(plot.is_empty());
        plot.plot_track(&Path2D::from_xy(&[0.0, 1.0], &[0.0, 0.0]))
            .plot_vehicle(&Pose2D::new(0.0, 0.0, 0.0), 2.0);
        assert_eq!(plot.title, "Run");
        assert_eq!(plot.len(), 3);
    }

    #[test]
    fn test_path_style() {
        let style = PathStyle::new(colors::DRIVEN, "Driven").with_line_width(3.0);
        assert_eq!(style.line_width, 3.0);
        assert_eq!(style.color, colors::DRIVEN);
    }
}
