use std::fmt::Write;

use crate::training::History;

pub const CHART_HEADER: [&str; 5] = ["epoch", "accuracy", "val_accuracy", "loss", "val_loss"];

/// Renders the per-epoch metrics of a run as an HTML table, one row per epoch.
pub fn render_chart(history: &History) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>training summary</title></head>\n<body>\n<table>\n",
    );

    html.push_str("<tr>");
    for column in CHART_HEADER {
        let _ = write!(html, "<th>{column}</th>");
    }
    html.push_str("</tr>\n");

    for (epoch, logs) in history.rows() {
        let _ = writeln!(
            html,
            "<tr><td>{epoch}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            logs.accuracy, logs.val_accuracy, logs.loss, logs.val_loss
        );
    }

    html.push_str("</table>\n</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::EpochLogs;

    #[test]
    fn one_row_per_epoch_in_header_order() {
        let mut history = History::default();
        history.push(
            EpochLogs {
                loss: 0.5,
                accuracy: 0.75,
                val_loss: 0.25,
                val_accuracy: 1.,
            },
            1.,
        );

        let html = render_chart(&history);
        assert!(html.contains(
            "<tr><th>epoch</th><th>accuracy</th><th>val_accuracy</th><th>loss</th><th>val_loss</th></tr>"
        ));
        assert!(html.contains("<tr><td>1</td><td>0.75</td><td>1</td><td>0.5</td><td>0.25</td></tr>"));
        assert_eq!(html.matches("<td>").count(), 5);
    }
}
