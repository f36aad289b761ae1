use approx::assert_relative_eq;
use stand_predictors::{
    OccupancyError, OccupancyOptions, SamplingDesign, SpatialOccupancyEstimator, SurveyPlot,
    YearWindow,
};

const SPECIES: &str = "BOJ";

fn plot(id: &str, year: i32, north_km: f64) -> SurveyPlot {
    // one degree of latitude is about 111.2 km
    SurveyPlot::new(id, year, 46.0 + north_km / 111.2, -71.5)
}

fn equal_weight_survey() -> Vec<SurveyPlot> {
    vec![
        plot("A", 2005, 0.0).with_basal_area(SPECIES, 3.0),
        plot("B", 2004, 1.0),
        plot("C", 2001, 2.0).with_basal_area(SPECIES, 0.5),
        plot("D", 1999, 3.0),
        plot("E", 1996, 4.0).with_basal_area("SAB", 7.0),
    ]
}

#[test]
fn equal_weights_use_simple_random_sample_mean() {
    let estimator = SpatialOccupancyEstimator::new(equal_weight_survey()).expect("valid plots");
    let (estimate, design) = estimator
        .estimate_with_design("A", 2005, SPECIES, OccupancyOptions::default())
        .expect("five plots");

    assert_eq!(design, SamplingDesign::SimpleRandom);
    assert_relative_eq!(estimate.mean(), 0.4);
    // s^2 / n with s^2 = n p (1 - p) / (n - 1)
    assert_relative_eq!(estimate.variance(), 0.3 / 5.0, epsilon = 1.0e-12);
}

#[test]
fn estimates_are_bit_identical_across_calls() {
    let estimator = SpatialOccupancyEstimator::new(equal_weight_survey()).expect("valid plots");
    let options = OccupancyOptions::default();
    let first = estimator
        .estimate("C", 2005, SPECIES, options)
        .expect("estimate");
    let second = estimator
        .estimate("C", 2005, SPECIES, options)
        .expect("estimate");
    assert_eq!(first.mean().to_bits(), second.mean().to_bits());
    assert_eq!(first.variance().to_bits(), second.variance().to_bits());
}

#[test]
fn unequal_weights_use_horvitz_thompson() {
    let plots = vec![
        plot("A", 2005, 0.0).with_weight(1.0).with_basal_area(SPECIES, 1.0),
        plot("B", 2005, 1.0).with_weight(1.0),
        plot("C", 2005, 2.0).with_weight(2.0).with_basal_area(SPECIES, 1.0),
        plot("D", 2005, 3.0).with_weight(2.0),
    ];
    let estimator = SpatialOccupancyEstimator::new(plots).expect("valid plots");
    let (estimate, design) = estimator
        .estimate_with_design("A", 2005, SPECIES, OccupancyOptions::default())
        .expect("four plots");

    assert_eq!(design, SamplingDesign::HorvitzThompson);
    // the expansion reduces to the weight-normalized proportion
    assert_relative_eq!(estimate.mean(), 3.0 / 6.0, epsilon = 1.0e-12);
    // expanded values 4 w y / 6 = [2/3, 0, 4/3, 0] around 1/2, over n (n - 1) = 12
    assert_relative_eq!(estimate.variance(), 11.0 / 108.0, epsilon = 1.0e-12);
}

#[test]
fn radius_and_year_window_bound_the_neighbourhood() {
    let mut plots = equal_weight_survey();
    plots.push(plot("FAR", 2005, 25.0).with_basal_area(SPECIES, 2.0));
    plots.push(plot("OLD", 1980, 0.5).with_basal_area(SPECIES, 2.0));
    let estimator = SpatialOccupancyEstimator::new(plots).expect("valid plots");

    let neighbours = estimator
        .neighbourhood("A", 2005, SPECIES, OccupancyOptions::default())
        .expect("known plot");
    let ids: Vec<&str> = neighbours.iter().map(|plot| plot.subject_id.as_str()).collect();
    assert_eq!(ids, ["A", "B", "C", "D", "E"]);

    let narrow = OccupancyOptions {
        max_radius_km: 2.5,
        year_window: YearWindow { min: 0, max: 5 },
    };
    let neighbours = estimator
        .neighbourhood("A", 2005, SPECIES, narrow)
        .expect("known plot");
    let ids: Vec<&str> = neighbours.iter().map(|plot| plot.subject_id.as_str()).collect();
    assert_eq!(ids, ["A", "B", "C"]);
}

#[test]
fn remeasured_plot_keeps_the_record_showing_presence() {
    let plots = vec![
        plot("A", 2005, 0.0),
        plot("B", 2000, 1.0),
        plot("B", 2004, 1.0).with_basal_area(SPECIES, 1.2),
        plot("C", 2003, 2.0),
    ];
    let estimator = SpatialOccupancyEstimator::new(plots).expect("valid plots");
    let estimate = estimator
        .estimate("A", 2005, SPECIES, OccupancyOptions::default())
        .expect("three distinct plots");
    assert_relative_eq!(estimate.mean(), 1.0 / 3.0, epsilon = 1.0e-12);
    assert_eq!(estimator.distances().len(), 3);
}

#[test]
fn single_plot_neighbourhood_is_insufficient() {
    let plots = vec![plot("A", 2005, 0.0), plot("B", 2005, 40.0)];
    let estimator = SpatialOccupancyEstimator::new(plots).expect("valid plots");
    let err = estimator
        .estimate("A", 2005, SPECIES, OccupancyOptions::default())
        .expect_err("only the focal plot is in range");
    assert_eq!(
        err,
        OccupancyError::InsufficientSample {
            subject_id: "A".to_owned(),
            year: 2005,
            found: 1,
        }
    );
}

#[test]
fn unknown_plot_and_bad_options_are_rejected() {
    let estimator = SpatialOccupancyEstimator::new(equal_weight_survey()).expect("valid plots");
    assert!(matches!(
        estimator.estimate("nowhere", 2005, SPECIES, OccupancyOptions::default()),
        Err(OccupancyError::UnknownSubject { .. })
    ));

    let options = OccupancyOptions {
        max_radius_km: -1.0,
        ..OccupancyOptions::default()
    };
    assert!(matches!(
        estimator.estimate("A", 2005, SPECIES, options),
        Err(OccupancyError::InvalidRadius(_))
    ));
}

#[test]
fn invalid_records_fail_construction() {
    let plots = vec![plot("A", 2005, 0.0).with_weight(0.0)];
    assert!(matches!(
        SpatialOccupancyEstimator::new(plots),
        Err(OccupancyError::InvalidPlot(_))
    ));
}
