use serde::Serialize;

use crate::domain::VariantType;
use crate::progress::ProgressRow;

pub const TITLE: &str = "Count of VCF files by source and variant type";

const BAR_WIDTH: u32 = 32;
const BAR_GAP: u32 = 8;
const PLOT_HEIGHT: u32 = 360;
const MARGIN: u32 = 48;

pub fn palette(variant_type: VariantType) -> &'static str {
    match variant_type {
        VariantType::Snv => "#336699",
        VariantType::Sv => "#993333",
        VariantType::Indel => "#669933",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartBar {
    pub label: String,
    pub source: String,
    pub workflow: String,
    pub variant_type: VariantType,
    pub count: usize,
}

impl ChartBar {
    pub fn color(&self) -> &'static str {
        palette(self.variant_type)
    }
}

/// One bar per (source, variant type, workflow) with a non-zero count. Sources keep the
/// given order, variant types follow [`VariantType::CHART_ORDER`] and workflows appear in
/// first-seen order.
pub fn build_bars(rows: &[ProgressRow], sources: &[&str]) -> Vec<ChartBar> {
    let mut bars = Vec::new();
    for source in sources {
        let mut workflows: Vec<&str> = Vec::new();
        for row in rows.iter().filter(|row| row.source == *source) {
            if !workflows.contains(&row.workflow.as_str()) {
                workflows.push(&row.workflow);
            }
        }
        for variant_type in VariantType::CHART_ORDER {
            for workflow in &workflows {
                let count = rows
                    .iter()
                    .filter(|row| {
                        row.source == *source
                            && row.workflow == *workflow
                            && row.variant_type == variant_type
                    })
                    .count();
                if count == 0 {
                    continue;
                }
                let label = if workflow == source {
                    source.to_string()
                } else {
                    format!("{source} - {workflow}")
                };
                bars.push(ChartBar {
                    label,
                    source: source.to_string(),
                    workflow: workflow.to_string(),
                    variant_type,
                    count,
                });
            }
        }
    }
    bars
}

pub fn render_svg(bars: &[ChartBar]) -> String {
    let max = bars.iter().map(|bar| bar.count).max().unwrap_or(0).max(1);
    let plot_width = (bars.len() as u32).max(1) * (BAR_WIDTH + BAR_GAP);
    let width = plot_width + MARGIN * 2 + 120;
    let height = PLOT_HEIGHT + MARGIN * 2;
    let baseline = MARGIN + PLOT_HEIGHT;

    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" \
         font-family=\"sans-serif\" font-size=\"11\">\n"
    );
    svg.push_str(&format!(
        "<text x=\"{}\" y=\"{}\" text-anchor=\"middle\" font-size=\"15\">{}</text>\n",
        width / 2,
        MARGIN / 2,
        escape(TITLE)
    ));
    svg.push_str(&format!(
        "<line x1=\"{MARGIN}\" y1=\"{baseline}\" x2=\"{}\" y2=\"{baseline}\" stroke=\"#000\"/>\n",
        MARGIN + plot_width
    ));

    for (i, bar) in bars.iter().enumerate() {
        let x = MARGIN + i as u32 * (BAR_WIDTH + BAR_GAP) + BAR_GAP / 2;
        let bar_height = (bar.count as u64 * PLOT_HEIGHT as u64 / max as u64) as u32;
        let y = baseline - bar_height;
        let center = x + BAR_WIDTH / 2;
        svg.push_str(&format!(
            "<rect x=\"{x}\" y=\"{y}\" width=\"{BAR_WIDTH}\" height=\"{bar_height}\" \
             fill=\"{}\" fill-opacity=\"0.6\"/>\n",
            bar.color()
        ));
        svg.push_str(&format!(
            "<text x=\"{center}\" y=\"{}\" text-anchor=\"middle\">{}</text>\n",
            y.saturating_sub(4),
            bar.count
        ));
        svg.push_str(&format!(
            "<text x=\"{center}\" y=\"{}\" transform=\"rotate(-90 {center} {})\">{}</text>\n",
            baseline - 4,
            baseline - 4,
            escape(&bar.label)
        ));
    }

    let legend_x = MARGIN + plot_width + 24;
    let mut legend_y = MARGIN;
    for variant_type in VariantType::CHART_ORDER {
        if !bars.iter().any(|bar| bar.variant_type == variant_type) {
            continue;
        }
        svg.push_str(&format!(
            "<rect x=\"{legend_x}\" y=\"{legend_y}\" width=\"12\" height=\"12\" fill=\"{}\" \
             fill-opacity=\"0.6\"/>\n",
            palette(variant_type)
        ));
        svg.push_str(&format!(
            "<text x=\"{}\" y=\"{}\">{variant_type}</text>\n",
            legend_x + 18,
            legend_y + 10
        ));
        legend_y += 18;
    }

    svg.push_str("</svg>\n");
    svg
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(source: &str, workflow: &str, variant_type: VariantType) -> ProgressRow {
        ProgressRow {
            sample_id: None,
            synapse_id: format!("syn-{source}-{workflow}-{variant_type}"),
            variant_type,
            source: source.to_string(),
            workflow: workflow.to_string(),
        }
    }

    #[test]
    fn bars_follow_source_variant_workflow_order() {
        let rows = vec![
            row("UCSC", "muse", VariantType::Snv),
            row("UCSC", "gatk_mutect", VariantType::Snv),
            row("UCSC", "gatk_mutect", VariantType::Snv),
            row("EMBL", "EMBL", VariantType::Sv),
            row("EMBL", "EMBL", VariantType::Indel),
        ];
        let bars = build_bars(&rows, &["EMBL", "UCSC", "DKFZ"]);
        let labels = bars.iter().map(|bar| bar.label.as_str()).collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec!["EMBL", "EMBL", "UCSC - muse", "UCSC - gatk_mutect"]
        );
        assert_eq!(bars[0].variant_type, VariantType::Sv);
        assert_eq!(bars[1].variant_type, VariantType::Indel);
        assert_eq!(bars[3].count, 2);
    }

    #[test]
    fn svg_has_a_rect_per_bar_and_escapes_labels() {
        let bars = build_bars(&[row("A&B", "x", VariantType::Snv)], &["A&B"]);
        let svg = render_svg(&bars);
        assert!(svg.contains("A&amp;B - x"));
        assert!(svg.contains(palette(VariantType::Snv)));
        assert!(svg.ends_with("</svg>\n"));
    }
}
