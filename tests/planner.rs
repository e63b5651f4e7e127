//! End-to-end scenarios driving the full `Planner` facade over constructed
//! manifests and file sets, rather than exercising individual components in
//! isolation (see the `#[cfg(test)]` modules next to `SchemaYamlDiffer`,
//! `EnvVarDiffer`, and `ParsePlan` for those).

use std::collections::{BTreeMap, BTreeSet};

use indexmap::{IndexMap, IndexSet};
use serde_yaml_ng::Value;

use reparse_planner::config::Config;
use reparse_planner::model::{
    Checksum, DocFile, FileId, FixtureFile, Manifest, ManifestEntry, NodeKind, ParseKind,
    SchemaFile, SchemaSection, SourceFile, SourceFilePayload, SqlFile, UniqueId, YamlElement,
};
use reparse_planner::Planner;

fn checksum(s: &str) -> Checksum {
    Checksum::new(s)
}

fn sql_file(id: &str, project: &str, kind: ParseKind, checksum_val: &str, nodes: &[&str]) -> SourceFile {
    let mut sql = SqlFile::default();
    for n in nodes {
        sql.nodes.insert(UniqueId::new(*n));
    }
    SourceFile {
        file_id: FileId::new(id),
        checksum: checksum(checksum_val),
        parse_kind: kind,
        project_name: project.to_owned(),
        env_vars: BTreeSet::new(),
        payload: SourceFilePayload::Sql(sql),
    }
}

fn macro_file(id: &str, project: &str, checksum_val: &str, macros: &[&str]) -> SourceFile {
    let mut sql = SqlFile::default();
    for m in macros {
        sql.macros.insert(UniqueId::new(*m));
        sql.nodes.insert(UniqueId::new(*m));
    }
    SourceFile {
        file_id: FileId::new(id),
        checksum: checksum(checksum_val),
        parse_kind: ParseKind::Macro,
        project_name: project.to_owned(),
        env_vars: BTreeSet::new(),
        payload: SourceFilePayload::Sql(sql),
    }
}

fn yaml_elem(name: &str, entries: &[(&str, &str)]) -> YamlElement {
    let mut body = serde_yaml_ng::Mapping::new();
    body.insert(Value::from("name"), Value::from(name));
    for (k, v) in entries {
        body.insert(Value::from(*k), Value::from(*v));
    }
    YamlElement::new(name, Value::Mapping(body))
}

fn schema_section_map(elems: Vec<YamlElement>) -> IndexMap<String, YamlElement> {
    let mut m = IndexMap::new();
    for e in elems {
        m.insert(e.name.clone(), e);
    }
    m
}

fn schema_file(id: &str, project: &str, checksum_val: &str) -> SourceFile {
    SourceFile {
        file_id: FileId::new(id),
        checksum: checksum(checksum_val),
        parse_kind: ParseKind::Schema,
        project_name: project.to_owned(),
        env_vars: BTreeSet::new(),
        payload: SourceFilePayload::Schema(SchemaFile::default()),
    }
}

fn entry(uid: &str, kind: NodeKind, file_id: &str) -> ManifestEntry {
    ManifestEntry::new(UniqueId::new(uid), kind, FileId::new(file_id))
}

fn project_files(plan: &reparse_planner::engine::ProjectParserFiles, project: &str, parser: &str) -> Vec<String> {
    plan.get(project)
        .and_then(|by_parser| by_parser.get(parser))
        .map(|files| files.iter().map(|f| f.as_str().to_owned()).collect())
        .unwrap_or_default()
}

// ---- S1: pure addition -----------------------------------------------------

#[test]
fn s1_pure_addition_enqueues_only_the_new_file() {
    let mut manifest = Manifest::new();
    let m1 = sql_file("proj://m1.sql", "proj", ParseKind::Model, "c1", &["model.proj.m1"]);
    manifest.files.insert(m1.file_id.clone(), m1.clone());
    manifest.insert(entry("model.proj.m1", NodeKind::Model, "proj://m1.sql"));
    manifest.rebuild_all_indices();

    let mut new_files = BTreeMap::new();
    new_files.insert(m1.file_id.clone(), m1);
    let m2 = sql_file("proj://m2.sql", "proj", ParseKind::Model, "c1", &["model.proj.m2"]);
    new_files.insert(m2.file_id.clone(), m2);

    let planner = Planner::new(&mut manifest, new_files);
    let result = planner.run().expect("planning succeeds");

    let scheduled = project_files(&result.project_parser_files, "proj", "model_parser");
    assert_eq!(scheduled, vec!["proj://m2.sql".to_owned()]);
    assert!(manifest.nodes.contains_key(&UniqueId::new("model.proj.m1")));
    assert!(!manifest.nodes.contains_key(&UniqueId::new("model.proj.m2")));
}

// ---- S2: edit of a referenced model ---------------------------------------

#[test]
fn s2_edit_of_referenced_model_reschedules_both_files() {
    let mut manifest = Manifest::new();
    let m1 = sql_file("proj://m1.sql", "proj", ParseKind::Model, "c1", &["model.proj.a"]);
    let m2 = sql_file("proj://m2.sql", "proj", ParseKind::Model, "c1", &["model.proj.b"]);
    manifest.files.insert(m1.file_id.clone(), m1.clone());
    manifest.files.insert(m2.file_id.clone(), m2.clone());

    manifest.insert(entry("model.proj.a", NodeKind::Model, "proj://m1.sql"));
    let mut b = entry("model.proj.b", NodeKind::Model, "proj://m2.sql");
    b.depends_on.insert(UniqueId::new("model.proj.a"));
    manifest.insert(b);
    manifest.rebuild_all_indices();

    let mut new_files = BTreeMap::new();
    let m1_edited = sql_file("proj://m1.sql", "proj", ParseKind::Model, "c2", &["model.proj.a"]);
    new_files.insert(m1_edited.file_id.clone(), m1_edited);
    new_files.insert(m2.file_id.clone(), m2);

    let planner = Planner::new(&mut manifest, new_files);
    let result = planner.run().expect("planning succeeds");

    let scheduled: BTreeSet<String> =
        project_files(&result.project_parser_files, "proj", "model_parser").into_iter().collect();
    assert!(scheduled.contains("proj://m1.sql"));
    assert!(scheduled.contains("proj://m2.sql"));
    assert!(!manifest.nodes.contains_key(&UniqueId::new("model.proj.a")));
    assert!(!manifest.nodes.contains_key(&UniqueId::new("model.proj.b")));
}

// ---- S3: macro edit with two-level fan-out --------------------------------

#[test]
fn s3_macro_edit_fans_out_through_macro_child_map() {
    let mut manifest = Manifest::new();
    let macro_m1 = macro_file("proj://m1.sql", "proj", "c1", &["macro.proj.m1"]);
    let macro_m2 = macro_file("proj://m2.sql", "proj", "c1", &["macro.proj.m2"]);
    let model_x = sql_file("proj://x.sql", "proj", ParseKind::Model, "c1", &["model.proj.x"]);
    let model_y = sql_file("proj://y.sql", "proj", ParseKind::Model, "c1", &["model.proj.y"]);

    manifest.files.insert(macro_m1.file_id.clone(), macro_m1.clone());
    manifest.files.insert(macro_m2.file_id.clone(), macro_m2.clone());
    manifest.files.insert(model_x.file_id.clone(), model_x.clone());
    manifest.files.insert(model_y.file_id.clone(), model_y.clone());

    let mut m1_entry = entry("macro.proj.m1", NodeKind::Macro, "proj://m1.sql");
    m1_entry.calls_macros.insert(UniqueId::new("macro.proj.m2"));
    manifest.insert(m1_entry);
    manifest.insert(entry("macro.proj.m2", NodeKind::Macro, "proj://m2.sql"));

    let mut x_entry = entry("model.proj.x", NodeKind::Model, "proj://x.sql");
    x_entry.calls_macros.insert(UniqueId::new("macro.proj.m1"));
    manifest.insert(x_entry);
    let mut y_entry = entry("model.proj.y", NodeKind::Model, "proj://y.sql");
    y_entry.calls_macros.insert(UniqueId::new("macro.proj.m1"));
    manifest.insert(y_entry);
    manifest.rebuild_all_indices();

    let mut new_files = BTreeMap::new();
    new_files.insert(macro_m1.file_id.clone(), macro_m1);
    let macro_m2_edited = macro_file("proj://m2.sql", "proj", "c2", &["macro.proj.m2"]);
    new_files.insert(macro_m2_edited.file_id.clone(), macro_m2_edited);
    new_files.insert(model_x.file_id.clone(), model_x);
    new_files.insert(model_y.file_id.clone(), model_y);

    let planner = Planner::new(&mut manifest, new_files);
    let result = planner.run().expect("planning succeeds");

    // Only the directly-edited macro file is scheduled; M1's own text didn't
    // change, so its file isn't re-enqueued even though its manifest entry is
    // evicted -- the fan-out continues past it to M1's own referrers.
    let scheduled: BTreeSet<String> =
        project_files(&result.project_parser_files, "proj", "macro_parser").into_iter().collect();
    assert!(scheduled.contains("proj://m2.sql"));
    assert!(!scheduled.contains("proj://m1.sql"));
    assert!(!manifest.macros.contains_key(&UniqueId::new("macro.proj.m1")));

    let model_scheduled: BTreeSet<String> =
        project_files(&result.project_parser_files, "proj", "model_parser").into_iter().collect();
    assert!(model_scheduled.contains("proj://x.sql"));
    assert!(model_scheduled.contains("proj://y.sql"));
}

// ---- S4: schema patch rename (group change) -------------------------------

#[test]
fn s4_group_change_reschedules_model_and_children() {
    let mut manifest = Manifest::new();
    let model_a = sql_file("proj://a.sql", "proj", ParseKind::Model, "c1", &["model.proj.a"]);
    let model_child = sql_file("proj://child.sql", "proj", ParseKind::Model, "c1", &["model.proj.child"]);
    let schema = schema_file("proj://models.yml", "proj", "sc1");

    manifest.files.insert(model_a.file_id.clone(), model_a.clone());
    manifest.files.insert(model_child.file_id.clone(), model_child.clone());

    let mut saved_schema = schema.clone();
    if let SourceFilePayload::Schema(s) = &mut saved_schema.payload {
        let elem = yaml_elem("a", &[("group", "g1")]);
        s.dict_from_yaml.insert(SchemaSection::Models, schema_section_map(vec![elem]));
        s.node_patches.insert(UniqueId::new("model.proj.a"));
    }
    manifest.files.insert(saved_schema.file_id.clone(), saved_schema);

    let mut a_entry = entry("model.proj.a", NodeKind::Model, "proj://a.sql");
    a_entry.patch_path = Some(FileId::new("proj://models.yml"));
    a_entry.group = Some("g1".to_owned());
    manifest.insert(a_entry);

    let mut child_entry = entry("model.proj.child", NodeKind::Model, "proj://child.sql");
    child_entry.depends_on.insert(UniqueId::new("model.proj.a"));
    manifest.insert(child_entry);
    manifest.rebuild_all_indices();

    let mut new_files = BTreeMap::new();
    new_files.insert(model_a.file_id.clone(), model_a);
    new_files.insert(model_child.file_id.clone(), model_child);

    let mut new_schema = schema_file("proj://models.yml", "proj", "sc2");
    if let SourceFilePayload::Schema(s) = &mut new_schema.payload {
        let elem = yaml_elem("a", &[("group", "g2")]);
        s.dict_from_yaml.insert(SchemaSection::Models, schema_section_map(vec![elem]));
    }
    new_files.insert(new_schema.file_id.clone(), new_schema);

    let planner = Planner::new(&mut manifest, new_files);
    let result = planner.run().expect("planning succeeds");

    let model_scheduled: BTreeSet<String> =
        project_files(&result.project_parser_files, "proj", "model_parser").into_iter().collect();
    assert!(model_scheduled.contains("proj://a.sql"));
    assert!(model_scheduled.contains("proj://child.sql"));

    let schema_scheduled: BTreeSet<String> =
        project_files(&result.project_parser_files, "proj", "schema_parser").into_iter().collect();
    assert!(schema_scheduled.contains("proj://models.yml"));

    let saved_schema_file = manifest.files.get(&FileId::new("proj://models.yml")).unwrap();
    let pp = saved_schema_file.payload.as_schema().unwrap();
    assert!(pp.pp_dict.get(&SchemaSection::Models).map_or(false, |s| s.contains_key("a")));
}

// ---- S5: source override ----------------------------------------------------

#[test]
fn s5_source_override_enqueues_both_schema_files() {
    let mut manifest = Manifest::new();

    let orig_schema = schema_file("p_orig://sources.yml", "p_orig", "o1");
    let mut saved_orig = orig_schema.clone();
    if let SourceFilePayload::Schema(s) = &mut saved_orig.payload {
        let elem = yaml_elem("s", &[]);
        s.dict_from_yaml.insert(SchemaSection::Sources, schema_section_map(vec![elem]));
        s.sources.insert(UniqueId::new("source.p_orig.s"));
    }
    manifest.files.insert(saved_orig.file_id.clone(), saved_orig);
    manifest.insert(entry("source.p_orig.s", NodeKind::Source, "p_orig://sources.yml"));

    let override_schema = schema_file("p_override://sources.yml", "p_override", "v1");
    manifest.files.insert(override_schema.file_id.clone(), override_schema);
    manifest.rebuild_all_indices();

    let mut new_files: BTreeMap<FileId, SourceFile> = manifest
        .files
        .iter()
        .map(|(id, f)| (id.clone(), f.clone()))
        .collect();

    let mut new_override = schema_file("p_override://sources.yml", "p_override", "v2");
    if let SourceFilePayload::Schema(s) = &mut new_override.payload {
        let mut body = serde_yaml_ng::Mapping::new();
        body.insert(Value::from("name"), Value::from("s"));
        body.insert(Value::from("overrides"), Value::from("p_orig"));
        let elem = YamlElement::new("s", Value::Mapping(body));
        s.dict_from_yaml.insert(SchemaSection::Sources, schema_section_map(vec![elem]));
    }
    new_files.insert(new_override.file_id.clone(), new_override);

    let planner = Planner::new(&mut manifest, new_files);
    let result = planner.run().expect("planning succeeds");

    let override_scheduled: BTreeSet<String> =
        project_files(&result.project_parser_files, "p_override", "schema_parser").into_iter().collect();
    assert!(override_scheduled.contains("p_override://sources.yml"));

    let orig_scheduled: BTreeSet<String> =
        project_files(&result.project_parser_files, "p_orig", "schema_parser").into_iter().collect();
    assert!(orig_scheduled.contains("p_orig://sources.yml"));

    let orig_file = manifest.files.get(&FileId::new("p_orig://sources.yml")).unwrap();
    let orig_pp = orig_file.payload.as_schema().unwrap();
    assert!(orig_pp.pp_dict.get(&SchemaSection::Sources).map_or(false, |s| s.contains_key("s")));
}

// ---- S6: special override macro deletion bailout --------------------------

#[test]
fn s6_deleting_special_override_macro_sets_bailout_flag() {
    let mut manifest = Manifest::new();
    let ref_macro = macro_file("user_pkg://overrides.sql", "user_pkg", "c1", &["macro.user_pkg.ref"]);
    manifest.files.insert(ref_macro.file_id.clone(), ref_macro);
    manifest.insert(entry("macro.user_pkg.ref", NodeKind::Macro, "user_pkg://overrides.sql"));
    manifest.rebuild_all_indices();

    let new_files: BTreeMap<FileId, SourceFile> = BTreeMap::new();

    let planner = Planner::new(&mut manifest, new_files).with_config(Config::default());
    let result = planner.run().expect("planning succeeds even though it should be discarded");

    assert!(result.deleted_special_override_macro);
    assert!(!manifest.macros.contains_key(&UniqueId::new("macro.user_pkg.ref")));
}

// ---- universally-quantified properties -------------------------------------

#[test]
fn skip_parsing_when_file_sets_and_checksums_are_identical() {
    let mut manifest = Manifest::new();
    let m1 = sql_file("proj://m1.sql", "proj", ParseKind::Model, "c1", &["model.proj.m1"]);
    manifest.files.insert(m1.file_id.clone(), m1.clone());
    manifest.insert(entry("model.proj.m1", NodeKind::Model, "proj://m1.sql"));
    manifest.rebuild_all_indices();

    let mut new_files = BTreeMap::new();
    new_files.insert(m1.file_id.clone(), m1);

    let planner = Planner::new(&mut manifest, new_files);
    assert!(!planner.diffs_exist());

    let result = planner.run().expect("planning succeeds");
    assert!(result.project_parser_files.is_empty());
}

#[test]
fn env_var_change_reschedules_file_with_unchanged_checksum() {
    let mut manifest = Manifest::new();
    let mut m1 = sql_file("proj://m1.sql", "proj", ParseKind::Model, "c1", &["model.proj.m1"]);
    m1.env_vars.insert("DBT_ENV".to_owned());
    manifest.files.insert(m1.file_id.clone(), m1.clone());
    manifest.insert(entry("model.proj.m1", NodeKind::Model, "proj://m1.sql"));
    manifest.env_vars.insert("DBT_ENV".to_owned(), "prod".to_owned());
    manifest.rebuild_all_indices();

    let mut new_files = BTreeMap::new();
    new_files.insert(m1.file_id.clone(), m1);

    let mut accessor = reparse_planner::diff::MapEnvAccessor::default();
    accessor.0.insert("DBT_ENV".to_owned(), "staging".to_owned());

    let planner = Planner::new(&mut manifest, new_files).with_env_accessor(accessor);
    let result = planner.run().expect("planning succeeds");

    let scheduled = project_files(&result.project_parser_files, "proj", "model_parser");
    assert_eq!(scheduled, vec!["proj://m1.sql".to_owned()]);
}

#[test]
fn no_orphan_patches_after_planning() {
    let mut manifest = Manifest::new();
    let model_a = sql_file("proj://a.sql", "proj", ParseKind::Model, "c1", &["model.proj.a"]);
    let schema = schema_file("proj://models.yml", "proj", "sc1");
    manifest.files.insert(model_a.file_id.clone(), model_a.clone());

    let mut saved_schema = schema.clone();
    if let SourceFilePayload::Schema(s) = &mut saved_schema.payload {
        let elem = yaml_elem("a", &[("group", "g1")]);
        s.dict_from_yaml.insert(SchemaSection::Models, schema_section_map(vec![elem]));
        s.node_patches.insert(UniqueId::new("model.proj.a"));
    }
    manifest.files.insert(saved_schema.file_id.clone(), saved_schema);

    let mut a_entry = entry("model.proj.a", NodeKind::Model, "proj://a.sql");
    a_entry.patch_path = Some(FileId::new("proj://models.yml"));
    a_entry.group = Some("g1".to_owned());
    manifest.insert(a_entry);
    manifest.rebuild_all_indices();

    let mut new_files = BTreeMap::new();
    new_files.insert(model_a.file_id.clone(), model_a);
    let mut new_schema = schema_file("proj://models.yml", "proj", "sc2");
    if let SourceFilePayload::Schema(s) = &mut new_schema.payload {
        let elem = yaml_elem("a", &[("group", "g2")]);
        s.dict_from_yaml.insert(SchemaSection::Models, schema_section_map(vec![elem]));
    }
    new_files.insert(new_schema.file_id.clone(), new_schema);

    let planner = Planner::new(&mut manifest, new_files);
    planner.run().expect("planning succeeds");

    // The evicted node's entry is gone entirely (it's reattached by the next
    // real parse), so the one dangling-reference case worth guarding against
    // is `node_patches` still naming a uid that no longer has a manifest
    // entry: that would be an orphan patch with nothing left to reassociate.
    assert!(!manifest.nodes.contains_key(&UniqueId::new("model.proj.a")));

    let saved_schema_file = manifest.files.get(&FileId::new("proj://models.yml")).unwrap();
    let pp = saved_schema_file.payload.as_schema().unwrap();
    assert!(!pp.node_patches.contains(&UniqueId::new("model.proj.a")));
    assert!(pp.pp_dict.get(&SchemaSection::Models).map_or(false, |s| s.contains_key("a")));
}

#[test]
fn doc_and_fixture_deletion_removes_owned_nodes() {
    let mut manifest = Manifest::new();

    let mut doc_file = SourceFile {
        file_id: FileId::new("proj://docs.md"),
        checksum: checksum("d1"),
        parse_kind: ParseKind::Documentation,
        project_name: "proj".to_owned(),
        env_vars: BTreeSet::new(),
        payload: SourceFilePayload::Doc(DocFile { docs: IndexSet::new() }),
    };
    if let SourceFilePayload::Doc(d) = &mut doc_file.payload {
        d.docs.insert(UniqueId::new("doc.proj.overview"));
    }
    manifest.files.insert(doc_file.file_id.clone(), doc_file);
    manifest
        .docs
        .insert(UniqueId::new("doc.proj.overview"), entry("doc.proj.overview", NodeKind::Model, "proj://docs.md"));

    let fixture_file = SourceFile {
        file_id: FileId::new("proj://fixtures/seed_data.csv"),
        checksum: checksum("f1"),
        parse_kind: ParseKind::Fixture,
        project_name: "proj".to_owned(),
        env_vars: BTreeSet::new(),
        payload: SourceFilePayload::Fixture(FixtureFile {
            fixture: Some(UniqueId::new("fixture.proj.seed_data")),
            consuming_unit_tests: IndexSet::new(),
        }),
    };
    manifest.files.insert(fixture_file.file_id.clone(), fixture_file);
    manifest.fixtures.insert(
        UniqueId::new("fixture.proj.seed_data"),
        entry("fixture.proj.seed_data", NodeKind::Model, "proj://fixtures/seed_data.csv"),
    );
    manifest.rebuild_all_indices();

    let new_files: BTreeMap<FileId, SourceFile> = BTreeMap::new();
    let planner = Planner::new(&mut manifest, new_files);
    planner.run().expect("planning succeeds");

    assert!(!manifest.docs.contains_key(&UniqueId::new("doc.proj.overview")));
    assert!(!manifest.files.contains_key(&FileId::new("proj://docs.md")));
    assert!(!manifest.fixtures.contains_key(&UniqueId::new("fixture.proj.seed_data")));
    assert!(!manifest.files.contains_key(&FileId::new("proj://fixtures/seed_data.csv")));
}
