use bson::{Bson, Document, doc};

/// One aggregation stage. Values are immutable once built; `to_document` gives the wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Document),
    Sort(Document),
    Skip(i64),
    Limit(i64),
    Project(Document),
    Lookup {
        from: String,
        bindings: Document,
        pipeline: Vec<Stage>,
        as_field: String,
    },
    Unwind {
        path: String,
    },
    Group {
        key: Bson,
        accumulators: Document,
    },
}

impl Stage {
    /// Wire key of the stage, e.g. `$match`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Match(_) => "$match",
            Self::Sort(_) => "$sort",
            Self::Skip(_) => "$skip",
            Self::Limit(_) => "$limit",
            Self::Project(_) => "$project",
            Self::Lookup { .. } => "$lookup",
            Self::Unwind { .. } => "$unwind",
            Self::Group { .. } => "$group",
        }
    }

    #[must_use]
    pub fn to_document(&self) -> Document {
        let body: Bson = match self {
            Self::Match(d) | Self::Sort(d) | Self::Project(d) => Bson::Document(d.clone()),
            Self::Skip(n) | Self::Limit(n) => Bson::Int64(*n),
            Self::Lookup { from, bindings, pipeline, as_field } => {
                let inner: Vec<Bson> = pipeline.iter().map(|s| Bson::Document(s.to_document())).collect();
                Bson::Document(doc! {
                    "from": from.as_str(),
                    "let": bindings.clone(),
                    "pipeline": inner,
                    "as": as_field.as_str(),
                })
            }
            Self::Unwind { path } => Bson::Document(doc! { "path": format!("${path}") }),
            Self::Group { key, accumulators } => {
                let mut body = doc! { "_id": key.clone() };
                for (name, acc) in accumulators {
                    body.insert(name.clone(), acc.clone());
                }
                Bson::Document(body)
            }
        };
        let mut out = Document::new();
        out.insert(self.name(), body);
        out
    }
}

/// Appends stages in call order; the finished pipeline is never reordered.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self { stages: Vec::with_capacity(n) }
    }

    #[must_use]
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    #[must_use]
    pub fn stages<I: IntoIterator<Item = Stage>>(mut self, stages: I) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Appends `stage` only when `Some`.
    #[must_use]
    pub fn maybe(self, stage: Option<Stage>) -> Self {
        match stage {
            Some(s) => self.stage(s),
            None => self,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[must_use]
    pub fn build(self) -> Vec<Stage> {
        self.stages
    }
}

/// Wire form of a whole pipeline.
#[must_use]
pub fn to_documents(stages: &[Stage]) -> Vec<Document> {
    stages.iter().map(Stage::to_document).collect()
}

/// Stage names in order; handy for logging and assertions.
#[must_use]
pub fn stage_names(stages: &[Stage]) -> Vec<&'static str> {
    stages.iter().map(Stage::name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_stages_render_single_key_documents() {
        assert_eq!(Stage::Match(doc! { "a": 1 }).to_document(), doc! { "$match": { "a": 1 } });
        assert_eq!(Stage::Sort(doc! { "a": -1 }).to_document(), doc! { "$sort": { "a": -1 } });
        assert_eq!(Stage::Skip(20).to_document(), doc! { "$skip": 20_i64 });
        assert_eq!(Stage::Limit(10).to_document(), doc! { "$limit": 10_i64 });
        assert_eq!(Stage::Project(doc! { "a": 1 }).to_document(), doc! { "$project": { "a": 1 } });
    }

    #[test]
    fn unwind_prefixes_path_with_dollar() {
        let s = Stage::Unwind { path: "author".into() };
        assert_eq!(s.to_document(), doc! { "$unwind": { "path": "$author" } });
    }

    #[test]
    fn group_puts_key_first() {
        let s = Stage::Group { key: Bson::String("$city".into()), accumulators: doc! { "count": { "$sum": 1 } } };
        assert_eq!(s.to_document(), doc! { "$group": { "_id": "$city", "count": { "$sum": 1 } } });
    }

    #[test]
    fn lookup_embeds_rendered_sub_pipeline() {
        let s = Stage::Lookup {
            from: "authors".into(),
            bindings: doc! { "id": "$author_id" },
            pipeline: vec![Stage::Limit(1)],
            as_field: "author".into(),
        };
        assert_eq!(
            s.to_document(),
            doc! { "$lookup": {
                "from": "authors",
                "let": { "id": "$author_id" },
                "pipeline": [ { "$limit": 1_i64 } ],
                "as": "author",
            } }
        );
    }

    #[test]
    fn builder_keeps_call_order_and_skips_none() {
        let stages = PipelineBuilder::new()
            .stage(Stage::Match(Document::new()))
            .maybe(None)
            .maybe(Some(Stage::Limit(3)))
            .stages([Stage::Skip(1), Stage::Limit(2)])
            .build();
        assert_eq!(stage_names(&stages), ["$match", "$limit", "$skip", "$limit"]);
    }
}
