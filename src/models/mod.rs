pub mod base_estimator;
pub mod cov_detector;
pub mod dual_cov_detector;
pub mod factor_analysis;
pub mod gmm;
pub mod intrusion_detector;
pub mod pca;
