use chrono::{Duration, Utc};
use rules_repository::{Error, RepositoryConfig, RulesRepository, VersionedRecord};
use speculate2::speculate;
use uuid::Uuid;

fn package_names(repo: &RulesRepository) -> Vec<String> {
    repo.list_packages()
        .expect("Failed to list packages")
        .map(|p| p.expect("Failed to load package").name().to_string())
        .collect()
}

fn file_config(dir: &tempfile::TempDir) -> RepositoryConfig {
    RepositoryConfig {
        database_path: Some(dir.path().join("rules.db")),
        ..RepositoryConfig::default()
    }
}

speculate! {
    before {
        let repo = RulesRepository::open_memory().expect("Failed to open in-memory repository");
    }

    describe "default package" {
        it "exists on a fresh repository and is listed" {
            assert!(package_names(&repo).contains(&"default".to_string()));

            let default = repo.load_default_rule_package().expect("Failed to load default");
            assert_eq!(default.name(), "default");
        }

        it "honours a configured name" {
            let store = std::sync::Arc::new(
                rules_repository::SqliteNodeStore::open_memory().expect("Failed to open store"),
            );
            let repo = RulesRepository::with_default_package(store, "main")
                .expect("Failed to open repository");
            assert_eq!(repo.load_default_rule_package().unwrap().name(), "main");
        }
    }

    describe "create_rule_package" {
        it "creates an empty package at version 1" {
            let package = repo.create_rule_package("testRulePackage", "desc")
                .expect("Failed to create package");

            assert_eq!(package.name(), "testRulePackage");
            assert_eq!(package.description().unwrap(), "desc");
            assert_eq!(package.version_number(), 1);
            assert_eq!(package.rules().unwrap().count(), 0);
        }

        it "rejects a duplicate name" {
            repo.create_rule_package("dupePackageTest", "testing for dupe").unwrap();

            let err = repo.create_rule_package("dupePackageTest", "this should fail").unwrap_err();
            assert!(matches!(err, Error::DuplicateName(_)));
            assert!(!err.to_string().is_empty());
        }

        it "rejects names with a path separator" {
            let err = repo.create_rule_package("a/b", "").unwrap_err();
            assert!(matches!(err, Error::InvalidName(_)));
        }
    }

    describe "list_packages" {
        it "grows by one for each new package" {
            repo.create_rule_package("testListPackages1", "lalalala").unwrap();
            let before = package_names(&repo).len();

            repo.create_rule_package("testListPackages2", "abc").unwrap();
            assert_eq!(package_names(&repo).len(), before + 1);
        }

        it "returns a fresh sequence on every call" {
            repo.create_rule_package("one", "").unwrap();
            let first: Vec<_> = package_names(&repo);
            let second: Vec<_> = package_names(&repo);
            assert_eq!(first, second);
        }
    }

    describe "load_rule_package" {
        it "loads a package by name" {
            repo.create_rule_package("testLoadRuleRuleItem", "desc").unwrap();

            let package = repo.load_rule_package("testLoadRuleRuleItem").expect("Failed to load");
            assert_eq!(package.name(), "testLoadRuleRuleItem");
            assert_eq!(package.description().unwrap(), "desc");
        }

        it "fails for a package that was never created" {
            let err = repo.load_rule_package("anotherRuleRuleItem").unwrap_err();
            assert!(matches!(err, Error::NotFound(_)));
        }

        it "loads a package by uuid" {
            let created = repo.create_rule_package("testLoadRuleRuleItemByUUID", "desc").unwrap();

            let loaded = repo.load_rule_package_by_uuid(created.uuid()).expect("Failed to load");
            assert_eq!(loaded.name(), "testLoadRuleRuleItemByUUID");

            let missing = Uuid::parse_str("01010101-0101-0101-0101-010101010101").unwrap();
            assert!(matches!(
                repo.load_rule_package_by_uuid(missing),
                Err(Error::NotFound(_))
            ));
        }

        it "refuses to treat an asset as a package" {
            let package = repo.load_default_rule_package().unwrap();
            let asset = package.add_asset("not a package", "").unwrap();

            assert!(matches!(
                repo.load_rule_package_by_uuid(asset.uuid()),
                Err(Error::NotFound(_))
            ));
        }
    }

    describe "assets" {
        it "keeps the preceding version after two checkins" {
            let package = repo.create_rule_package("testAddVersionARule", "description").unwrap();
            repo.save().unwrap();

            let mut rule = package.add_asset("my rule", "foobar").unwrap();
            assert_eq!(rule.name(), "my rule");

            rule.update_content("foo foo").unwrap();
            rule.checkin("version0").unwrap();

            package.add_asset("other rule", "description").unwrap();

            rule.update_content("foo bar").unwrap();
            rule.checkin("version1").unwrap();

            let reloaded = repo.load_rule_package("testAddVersionARule").unwrap();
            assert_eq!(reloaded.rules().unwrap().count(), 2);

            let prev = rule.preceding_version().unwrap().expect("No preceding version");
            assert_eq!(rule.content().unwrap(), "foo bar");
            assert_eq!(rule.checkin_comment().unwrap(), "version1");
            assert_eq!(prev.content().unwrap(), "foo foo");
            assert_eq!(prev.checkin_comment().unwrap(), "version0");
        }

        it "loads an asset by uuid and follows its checkins" {
            let package = repo.load_default_rule_package().unwrap();
            let rule = package.add_asset("testLoadRuleByUUID", "this is a description").unwrap();
            repo.save().unwrap();

            let mut loaded = repo.load_rule_by_uuid(rule.uuid()).expect("Failed to load");
            assert_eq!(loaded.name(), "testLoadRuleByUUID");
            assert_eq!(loaded.description().unwrap(), "this is a description");
            let old_version = loaded.version_number();

            loaded.update_content("xxx").unwrap();
            loaded.checkin("woo").unwrap();

            let reload = repo.load_rule_by_uuid(rule.uuid()).unwrap();
            assert_eq!(reload.name(), "testLoadRuleByUUID");
            assert_eq!(reload.content().unwrap(), "xxx");
            assert_ne!(reload.version_number(), old_version);
            assert!(reload.last_modified().unwrap().is_some());

            let missing = Uuid::parse_str("01010101-0101-0101-0101-010101010101").unwrap();
            assert!(matches!(repo.load_rule_by_uuid(missing), Err(Error::NotFound(_))));
        }

        it "stores effective and expiry dates" {
            let effective = Utc::now();
            let expired = effective + Duration::days(1);

            let mut rule = repo.load_default_rule_package().unwrap()
                .add_asset("testAddRuleCalendarCalendar", "desc").unwrap();
            rule.update_date_effective(effective).unwrap();
            rule.update_date_expired(expired).unwrap();

            assert_eq!(rule.date_effective().unwrap(), Some(effective));
            assert_eq!(rule.date_expired().unwrap(), Some(expired));

            rule.checkin("ho ").unwrap();
            let frozen = rule.load_version(rule.version_number()).unwrap();
            assert_eq!(frozen.date_expired().unwrap(), Some(expired));
        }

        it "lists the full history oldest first" {
            let mut rule = repo.load_default_rule_package().unwrap()
                .add_asset("history", "").unwrap();
            rule.update_content("a").unwrap();
            rule.checkin("first").unwrap();
            rule.update_content("b").unwrap();
            rule.checkin("second").unwrap();

            let history = rule.version_history().unwrap();
            let numbers: Vec<_> = history.iter().map(|v| v.version_number()).collect();
            assert_eq!(numbers, vec![1, 2, 3]);
            assert!(history.iter().all(|v| v.is_historical()));
            assert_eq!(history[2].content().unwrap(), "b");
        }
    }

    describe "move_rule_item_package" {
        it "moves the asset and records the move in its history" {
            let source = repo.create_rule_package("testMove", "description").unwrap();
            let mut rule = source.add_asset("testMove", "description").unwrap();
            rule.checkin("version0").unwrap();
            assert_eq!(rule.package_name().unwrap(), "testMove");
            repo.save().unwrap();

            assert_eq!(source.rules().unwrap().count(), 1);

            repo.create_rule_package("testMove2", "description").unwrap();
            repo.move_rule_item_package("testMove2", rule.uuid(), "explanation")
                .expect("Failed to move");

            let source = repo.load_rule_package("testMove").unwrap();
            assert_eq!(source.rules().unwrap().count(), 0);

            let target = repo.load_rule_package("testMove2").unwrap();
            let moved: Vec<_> = target.rules().unwrap().collect::<Result<_, _>>().unwrap();
            assert_eq!(moved.len(), 1);

            let moved = &moved[0];
            assert_eq!(moved.name(), "testMove");
            assert_eq!(moved.package_name().unwrap(), "testMove2");
            assert_eq!(moved.checkin_comment().unwrap(), "explanation");

            let before = moved.preceding_version().unwrap().expect("No preceding version");
            assert_eq!(before.package_name().unwrap(), "testMove");
            assert_eq!(before.checkin_comment().unwrap(), "version0");
        }

        it "keeps a handle held across the move on the current history" {
            let source = repo.create_rule_package("A", "").unwrap();
            repo.create_rule_package("B", "").unwrap();
            let mut held = source.add_asset("r", "").unwrap();
            held.checkin("version0").unwrap();

            repo.move_rule_item_package("B", held.uuid(), "explanation").unwrap();

            assert_eq!(held.version_number(), 3);
            assert_eq!(held.checkin_comment().unwrap(), "explanation");
            assert_eq!(held.package_name().unwrap(), "B");

            let before = held.preceding_version().unwrap().expect("No preceding version");
            assert_eq!(before.version_number(), 2);
            assert_eq!(before.checkin_comment().unwrap(), "version0");
            assert_eq!(before.package_name().unwrap(), "A");

            assert!(matches!(held.update_content("late"), Err(Error::ConcurrentModification(_))));
        }

        it "refuses to overwrite an asset of the same name" {
            let a = repo.create_rule_package("a", "").unwrap();
            let b = repo.create_rule_package("b", "").unwrap();
            let rule = a.add_asset("shared", "").unwrap();
            b.add_asset("shared", "").unwrap();

            let err = repo.move_rule_item_package("b", rule.uuid(), "clash").unwrap_err();
            assert!(matches!(err, Error::DuplicateName(_)));
            assert_eq!(a.rules().unwrap().count(), 1);
        }

        it "fails for an unknown destination" {
            let a = repo.create_rule_package("a", "").unwrap();
            let rule = a.add_asset("r", "").unwrap();

            let err = repo.move_rule_item_package("nowhere", rule.uuid(), "x").unwrap_err();
            assert!(matches!(err, Error::NotFound(_)));
        }
    }

    describe "states" {
        it "returns the same state for the same name" {
            let first = repo.get_state("testGetState").unwrap();
            assert_eq!(first.name(), "testGetState");

            let second = repo.get_state("testGetState").unwrap();
            assert_eq!(second.name(), "testGetState");
            assert_eq!(first, second);
            assert_eq!(repo.list_states().unwrap(), vec![first]);
        }

        it "resolves an asset's state on demand" {
            let rule = repo.load_default_rule_package().unwrap().add_asset("tagged", "").unwrap();
            assert!(rule.state().unwrap().is_none());

            let draft = rule.update_state("draft").unwrap();
            assert_eq!(rule.state().unwrap(), Some(draft.clone()));
            assert_eq!(repo.get_state("draft").unwrap(), draft);
        }
    }

    describe "categories" {
        it "builds full paths below the root" {
            let root = repo.load_category("/").unwrap();
            let tag = root.add_category("testGetTag", "ho").unwrap();
            assert_eq!(tag.name(), "testGetTag");
            assert_eq!(tag.full_path(), "testGetTag");
            assert_eq!(tag.description().unwrap(), "ho");

            let loaded = repo.load_category("testGetTag").unwrap();
            assert_eq!(loaded.name(), "testGetTag");
            assert_eq!(loaded, tag);

            let child = loaded.add_category("TestChildTag1", "ka").unwrap();
            assert_eq!(child.name(), "TestChildTag1");
            assert_eq!(child.full_path(), "testGetTag/TestChildTag1");
            assert_eq!(child.parent().unwrap(), Some(tag));
        }

        it "rejects a duplicate child" {
            let root = repo.load_category("/").unwrap();
            root.add_category("dupe", "").unwrap();
            assert!(matches!(root.add_category("dupe", ""), Err(Error::DuplicateName(_))));
        }

        it "fails to load a missing path" {
            assert!(matches!(repo.load_category("no/such"), Err(Error::NotFound(_))));
        }

        it "creates missing segments on demand" {
            let leaf = repo.get_or_create_category("finance/tax/vat").unwrap();
            assert_eq!(leaf.full_path(), "finance/tax/vat");
            assert_eq!(repo.load_category("/finance/tax/").unwrap().name(), "tax");
        }

        it "finds assets tagged with a category" {
            repo.get_or_create_category("finance/tax").unwrap();
            let a = repo.create_rule_package("a", "").unwrap();
            let b = repo.create_rule_package("b", "").unwrap();
            let r1 = a.add_asset("r1", "").unwrap();
            let r2 = b.add_asset("r2", "").unwrap();
            b.add_asset("untagged", "").unwrap();

            r1.add_category("finance/tax").unwrap();
            r2.add_category("/finance/tax").unwrap();
            r2.add_category("finance").unwrap();

            let mut found: Vec<_> = repo.find_assets_by_category("finance/tax").unwrap()
                .iter().map(|a| a.name().to_string()).collect();
            found.sort();
            assert_eq!(found, vec!["r1", "r2"]);

            assert_eq!(r2.category_paths().unwrap(), vec!["finance/tax", "finance"]);
            assert_eq!(r2.categories().unwrap().len(), 2);

            r2.remove_category("finance/tax").unwrap();
            assert_eq!(repo.find_assets_by_category("finance/tax").unwrap().len(), 1);
        }

        it "refuses unknown categories on assets" {
            let rule = repo.load_default_rule_package().unwrap().add_asset("r", "").unwrap();
            assert!(matches!(rule.add_category("ghost"), Err(Error::NotFound(_))));
        }
    }

    describe "functions" {
        it "defaults the description to empty" {
            let function = repo
                .add_function("testAddFunctionStringString", "test content")
                .unwrap();
            assert_eq!(function.name(), "testAddFunctionStringString");
            assert_eq!(function.content().unwrap(), "test content");
            assert_eq!(function.description().unwrap(), "");
            assert_eq!(function.format(), "function");
        }

        it "stores a description" {
            let function = repo
                .add_function_with_description("withDesc", "test content", "test description")
                .unwrap();
            assert_eq!(function.description().unwrap(), "test description");
            assert_eq!(repo.load_function("withDesc").unwrap().uuid(), function.uuid());
        }

        it "rejects a duplicate function name" {
            repo.add_function("f", "").unwrap();
            assert!(matches!(repo.add_function("f", ""), Err(Error::DuplicateName(_))));
        }
    }

    describe "session" {
        it "discards unsaved changes" {
            repo.create_rule_package("kept", "").unwrap();
            repo.save().unwrap();
            repo.create_rule_package("dropped", "").unwrap();
            repo.discard().unwrap();

            assert!(repo.load_rule_package("kept").is_ok());
            assert!(matches!(repo.load_rule_package("dropped"), Err(Error::NotFound(_))));
        }

        it "persists saved changes across sessions" {
            let dir = tempfile::tempdir().unwrap();
            let config = file_config(&dir);
            {
                let repo = RulesRepository::open(&config).expect("Failed to open");
                let package = repo.create_rule_package("durable", "").unwrap();
                let mut rule = package.add_asset("r", "").unwrap();
                rule.update_content("saved").unwrap();
                rule.checkin("c").unwrap();
                repo.save().unwrap();
                repo.create_rule_package("unsaved", "").unwrap();
            }

            let repo = RulesRepository::open(&config).expect("Failed to reopen");
            let package = repo.load_rule_package("durable").unwrap();
            assert_eq!(package.load_rule("r").unwrap().content().unwrap(), "saved");
            assert!(matches!(repo.load_rule_package("unsaved"), Err(Error::NotFound(_))));
        }

        it "reports concurrent writers instead of overwriting" {
            let dir = tempfile::tempdir().unwrap();
            let config = file_config(&dir);
            let first = RulesRepository::open(&config).expect("Failed to open first session");
            let second = RulesRepository::open(&config).expect("Failed to open second session");

            first.create_rule_package("from-first", "").unwrap();
            let err = second.create_rule_package("from-second", "").unwrap_err();
            assert!(matches!(err, Error::ConcurrentModification(_)));

            first.save().unwrap();
            second.discard().unwrap();
            second.create_rule_package("from-second", "").unwrap();
            second.save().unwrap();
            assert!(second.load_rule_package("from-first").is_ok());
        }
    }
}
