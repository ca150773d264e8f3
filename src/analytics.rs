//! Puntuación de rendimiento de páginas y cálculo del embudo de conversión.
//!
//! Funciones puras: sin llamadas externas ni aleatoriedad. Las entradas
//! degeneradas (conjunto vacío, duraciones a cero, pasos sin fila) se resuelven
//! con valores por defecto documentados o NaN, nunca con un error.

use std::cmp::Ordering;

use crate::models::{AnalyticsRow, FunnelStep, ScoredRow};

/// Puntuación neutra cuando una métrica falta o no se puede normalizar.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Umbral de referencia para considerar una página con bajo rendimiento.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Puntúa todas las filas sin filtrar, conservando el orden de entrada.
pub fn annotate(rows: &[AnalyticsRow]) -> Vec<ScoredRow> {
    let max_duration = rows
        .iter()
        .filter_map(|r| r.avg_duration)
        .filter(|d| d.is_finite())
        .fold(0.0_f64, f64::max);

    rows.iter()
        .map(|row| {
            let bounce_score = match row.bounce_rate {
                Some(rate) if rate.is_finite() => (1.0 - rate / 100.0).clamp(0.0, 1.0),
                _ => NEUTRAL_SCORE,
            };
            let duration_score = match row.avg_duration {
                Some(d) if max_duration > 0.0 && d.is_finite() => (d.max(0.0) / max_duration).clamp(0.0, 1.0),
                _ => NEUTRAL_SCORE,
            };
            ScoredRow {
                row: row.clone(),
                bounce_score,
                duration_score,
                performance_score: (bounce_score + duration_score) / 2.0,
            }
        })
        .collect()
}

/// Filas con `performance_score < threshold`, de peor a mejor. Los empates
/// conservan el orden de entrada.
pub fn score(rows: &[AnalyticsRow], threshold: f64) -> Vec<ScoredRow> {
    let mut underperforming: Vec<ScoredRow> = annotate(rows)
        .into_iter()
        .filter(|s| s.performance_score < threshold)
        .collect();
    // sort_by es estable
    underperforming.sort_by(|a, b| {
        a.performance_score
            .partial_cmp(&b.performance_score)
            .unwrap_or(Ordering::Equal)
    });
    underperforming
}

/// Embudo por pasos. Cada paso se compara sólo con su predecesor inmediato en
/// `steps`; los pasos sin fila se omiten y el paso siguiente queda en NaN.
pub fn compute_funnel<S: AsRef<str>>(rows: &[AnalyticsRow], steps: &[S]) -> Vec<FunnelStep> {
    let find = |key: &str| rows.iter().find(|r| r.entity_key == key);

    steps
        .iter()
        .enumerate()
        .filter_map(|(i, key)| {
            let key = key.as_ref();
            let row = find(key)?;

            if i == 0 {
                return Some(FunnelStep {
                    step_index: 1,
                    entity_key: key.to_string(),
                    views: row.views,
                    previous_step: None,
                    conversion_rate: 100.0,
                    dropoff_rate: 0.0,
                });
            }

            let previous_key = steps[i - 1].as_ref();
            let conversion_rate = match find(previous_key) {
                Some(prev) if prev.views > 0 => row.views as f64 / prev.views as f64 * 100.0,
                _ => f64::NAN,
            };

            Some(FunnelStep {
                step_index: i + 1,
                entity_key: key.to_string(),
                views: row.views,
                previous_step: Some(previous_key.to_string()),
                conversion_rate,
                dropoff_rate: 100.0 - conversion_rate,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site_rows() -> Vec<AnalyticsRow> {
        vec![
            AnalyticsRow::new("/home", 1000, 30.0, 120.0),
            AnalyticsRow::new("/about", 500, 60.0, 60.0),
            AnalyticsRow::new("/contact", 200, 90.0, 30.0),
            AnalyticsRow::new("/product", 300, 80.0, 45.0),
        ]
    }

    fn keys(scored: &[ScoredRow]) -> Vec<&str> {
        scored.iter().map(|s| s.row.entity_key.as_str()).collect()
    }

    #[test]
    fn worst_pages_come_first() {
        let scored = score(&site_rows(), 0.3);
        assert_eq!(keys(&scored), vec!["/contact", "/product"]);
        assert!((scored[0].performance_score - 0.175).abs() < 1e-9);
        assert!((scored[1].performance_score - 0.2875).abs() < 1e-9);
    }

    #[test]
    fn threshold_is_strict_and_caller_supplied() {
        // /about puntúa 0.45: entra con 0.6 pero no con 0.44.
        assert_eq!(keys(&score(&site_rows(), 0.6)), vec!["/contact", "/product", "/about"]);
        assert_eq!(keys(&score(&site_rows(), 0.44)), vec!["/contact", "/product"]);
        assert_eq!(score(&site_rows(), DEFAULT_THRESHOLD).len(), 3);
    }

    #[test]
    fn component_scores_stay_in_unit_interval() {
        for s in annotate(&site_rows()) {
            assert!((0.0..=1.0).contains(&s.bounce_score));
            assert!((0.0..=1.0).contains(&s.duration_score));
            assert_eq!(s.performance_score, (s.bounce_score + s.duration_score) / 2.0);
        }
    }

    #[test]
    fn all_zero_durations_score_neutral() {
        let rows = vec![
            AnalyticsRow::new("/a", 10, 50.0, 0.0),
            AnalyticsRow::new("/b", 10, 20.0, 0.0),
        ];
        assert!(annotate(&rows).iter().all(|s| s.duration_score == NEUTRAL_SCORE));
    }

    #[test]
    fn missing_metrics_score_neutral() {
        let mut row = AnalyticsRow::new("/a", 10, 0.0, 0.0);
        row.bounce_rate = None;
        row.avg_duration = None;
        let scored = annotate(&[row, AnalyticsRow::new("/b", 10, 20.0, 30.0)]);
        assert_eq!(scored[0].bounce_score, NEUTRAL_SCORE);
        assert_eq!(scored[0].duration_score, NEUTRAL_SCORE);
        assert_eq!(scored[1].duration_score, 1.0);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(score(&[], DEFAULT_THRESHOLD).is_empty());
    }

    #[test]
    fn scoring_is_idempotent_and_ties_keep_input_order() {
        let rows = vec![
            AnalyticsRow::new("/first", 1, 80.0, 10.0),
            AnalyticsRow::new("/second", 1, 80.0, 10.0),
            AnalyticsRow::new("/best", 1, 0.0, 100.0),
        ];
        let once = score(&rows, 1.5);
        let twice = score(&rows, 1.5);
        assert_eq!(once, twice);
        assert_eq!(keys(&once), vec!["/first", "/second", "/best"]);
    }

    #[test]
    fn longer_duration_never_scores_lower_at_equal_bounce() {
        let rows = vec![
            AnalyticsRow::new("/short", 1, 40.0, 20.0),
            AnalyticsRow::new("/long", 1, 40.0, 80.0),
            AnalyticsRow::new("/other", 1, 10.0, 100.0),
        ];
        let scored = annotate(&rows);
        assert!(scored[1].performance_score >= scored[0].performance_score);
    }

    #[test]
    fn funnel_omits_steps_without_rows() {
        let rows = vec![
            AnalyticsRow::new("A", 1000, 0.0, 0.0),
            AnalyticsRow::new("B", 500, 0.0, 0.0),
        ];
        let funnel = compute_funnel(&rows, &["A", "B", "C"]);

        assert_eq!(funnel.len(), 2);
        assert_eq!(funnel[0].step_index, 1);
        assert_eq!(funnel[0].conversion_rate, 100.0);
        assert_eq!(funnel[0].dropoff_rate, 0.0);
        assert_eq!(funnel[0].previous_step, None);
        assert_eq!(funnel[1].entity_key, "B");
        assert_eq!(funnel[1].conversion_rate, 50.0);
        assert_eq!(funnel[1].dropoff_rate, 50.0);
        assert_eq!(funnel[1].previous_step.as_deref(), Some("A"));
    }

    #[test]
    fn step_after_a_gap_is_not_a_number() {
        let rows = vec![
            AnalyticsRow::new("/home", 1000, 0.0, 0.0),
            AnalyticsRow::new("/checkout", 100, 0.0, 0.0),
        ];
        let funnel = compute_funnel(&rows, &["/home", "/cart", "/checkout"]);

        assert_eq!(funnel.len(), 2);
        assert_eq!(funnel[1].step_index, 3);
        assert_eq!(funnel[1].previous_step.as_deref(), Some("/cart"));
        assert!(funnel[1].conversion_rate.is_nan());
        assert!(funnel[1].dropoff_rate.is_nan());
    }

    #[test]
    fn missing_first_step_keeps_later_steps_relative_to_it() {
        let rows = vec![AnalyticsRow::new("B", 500, 0.0, 0.0)];
        let funnel = compute_funnel(&rows, &["A", "B"]);
        assert_eq!(funnel.len(), 1);
        assert_eq!(funnel[0].step_index, 2);
        assert!(funnel[0].conversion_rate.is_nan());
    }
}
