use crate::config::{QualityRule, RuleSet};
use crate::types::{Field, FieldData};
use ndarray::{Array2, Axis, Zip};

/// Set of fields sharing one 2-D pixel grid, e.g. an extracted window
#[derive(Debug, Clone)]
pub struct GridFields {
    /// (rows, cols) of the pixel grid
    pub dim: (usize, usize),
    pub fields: Vec<Field>,
}

impl GridFields {
    pub fn new(dim: (usize, usize), fields: Vec<Field>) -> Self {
        Self { dim, fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn pixel_count(&self) -> usize {
        self.dim.0 * self.dim.1
    }
}

/// Result of applying quality rules
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// Masked copy of the input; pixels failing any rule are NaN
    pub data: GridFields,
    /// Combined per-pixel mask, `true` where every rule passed
    pub mask: Array2<bool>,
    /// Rule fields that were not present in the input
    pub missing_fields: Vec<String>,
}

impl FilterOutcome {
    pub fn valid_pixels(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// Pixel quality filter driven by named range/equality rules
pub struct QualityFilter;

impl QualityFilter {
    /// Apply `rules` to `data`, returning a masked copy and the combined mask.
    ///
    /// Missing rule fields and malformed rules are logged and skipped. When no
    /// rule can be evaluated the mask is all-true and the data is unchanged.
    pub fn apply(data: &GridFields, rules: &RuleSet) -> FilterOutcome {
        let mut mask = Array2::from_elem(data.dim, true);
        let mut missing_fields = Vec::new();
        let mut applied = 0usize;

        log::debug!("Valid pixels before filtering: {}", data.pixel_count());

        for (name, rule) in rules.iter() {
            let field = match data.field(name) {
                Some(field) => field,
                None => {
                    log::warn!("Rule field '{}' not found in dataset, skipping rule", name);
                    missing_fields.push(name.to_string());
                    continue;
                }
            };

            if let QualityRule::Malformed(count) = rule {
                log::warn!(
                    "Invalid rule format for '{}': expected 1 or 2 values, got {}",
                    name,
                    count
                );
                continue;
            }

            match Self::rule_mask(field, rule, data.dim) {
                Some(condition) => {
                    log::debug!("Applying rule for {}: {:?}", name, rule);
                    Zip::from(&mut mask)
                        .and(&condition)
                        .for_each(|m, &c| *m = *m && c);
                    applied += 1;
                }
                None => {
                    log::warn!(
                        "Rule field '{}' has shape {:?} incompatible with grid {:?}, skipping rule",
                        name,
                        field.data.shape(),
                        data.dim
                    );
                }
            }
        }

        if applied == 0 {
            if !rules.is_empty() {
                log::warn!("No valid rule fields found in dataset");
            }
            return FilterOutcome {
                data: data.clone(),
                mask,
                missing_fields,
            };
        }

        let fields = data
            .fields
            .iter()
            .map(|field| Self::mask_field(field, &mask))
            .collect();

        let outcome = FilterOutcome {
            data: GridFields::new(data.dim, fields),
            mask,
            missing_fields,
        };
        log::debug!("Valid pixels after filtering: {}", outcome.valid_pixels());
        outcome
    }

    /// Elementwise rule result on the 2-D grid. Banded rule fields pass a pixel
    /// only when every band passes; scalar rule fields broadcast.
    fn rule_mask(field: &Field, rule: QualityRule, dim: (usize, usize)) -> Option<Array2<bool>> {
        match &field.data {
            FieldData::Scalar(value) => Some(Array2::from_elem(dim, rule.accepts(*value))),
            FieldData::Grid(grid) if grid.dim() == dim => Some(grid.mapv(|v| rule.accepts(v))),
            FieldData::Banded(cube) if field.data.grid_dim() == Some(dim) => {
                let mut condition = Array2::from_elem(dim, true);
                Zip::from(&mut condition)
                    .and(cube.lanes(Axis(2)))
                    .for_each(|c, lane| *c = lane.iter().all(|&v| rule.accepts(v)));
                Some(condition)
            }
            _ => None,
        }
    }

    /// `where`-style masking: shape is preserved, rejected pixels become NaN
    fn mask_field(field: &Field, mask: &Array2<bool>) -> Field {
        let data = match &field.data {
            FieldData::Grid(grid) if grid.dim() == mask.dim() => {
                let mut masked = grid.clone();
                Zip::from(&mut masked).and(mask).for_each(|v, &keep| {
                    if !keep {
                        *v = f64::NAN;
                    }
                });
                FieldData::Grid(masked)
            }
            FieldData::Banded(cube) if field.data.grid_dim() == Some(mask.dim()) => {
                let mut masked = cube.clone();
                Zip::from(masked.lanes_mut(Axis(2)))
                    .and(mask)
                    .for_each(|mut lane, &keep| {
                        if !keep {
                            lane.fill(f64::NAN);
                        }
                    });
                FieldData::Banded(masked)
            }
            FieldData::Scalar(_) => field.data.clone(),
            other => {
                log::warn!(
                    "Could not apply mask to field '{}' with shape {:?}",
                    field.name,
                    other.shape()
                );
                other.clone()
            }
        };
        Field::new(field.name.clone(), data)
    }
}
